//! Expression tree and row evaluation.

use std::collections::BTreeSet;

use etlflow_types::{Record, Value};

use crate::error::{Result, TransformError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Round,
    Upper,
    Lower,
    Len,
    Concat,
    Coalesce,
}

impl Function {
    /// Look up a function by name and check its argument count.
    pub(crate) fn resolve(name: &str, arity: usize) -> Result<Self> {
        let (function, ok) = match name.to_ascii_lowercase().as_str() {
            "abs" => (Self::Abs, arity == 1),
            "round" => (Self::Round, (1..=2).contains(&arity)),
            "upper" => (Self::Upper, arity == 1),
            "lower" => (Self::Lower, arity == 1),
            "len" => (Self::Len, arity == 1),
            "concat" => (Self::Concat, arity >= 1),
            "coalesce" => (Self::Coalesce, arity >= 1),
            other => {
                return Err(TransformError::config(format!("unknown function '{other}'")));
            }
        };
        if ok {
            Ok(function)
        } else {
            Err(TransformError::config(format!(
                "wrong number of arguments ({arity}) for {name}()"
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Call(Function, Vec<Expr>),
}

type Eval = std::result::Result<Value, String>;

fn type_error(op: &str, a: &Value, b: &Value) -> String {
    format!(
        "cannot apply '{op}' to {} and {}",
        a.type_name(),
        b.type_name()
    )
}

/// Floor modulo, matching the sign of the divisor.
fn float_mod(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

#[allow(clippy::cast_precision_loss)]
fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Eval {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    if op == BinaryOp::Add {
        if let (Value::Text(x), Value::Text(y)) = (a, b) {
            return Ok(Value::Text(format!("{x}{y}")));
        }
    }
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        _ => "^",
    };
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Err(type_error(symbol, a, b));
    };
    if let (Value::Int(i), Value::Int(j)) = (a, b) {
        let exact = match op {
            BinaryOp::Add => i.checked_add(*j),
            BinaryOp::Sub => i.checked_sub(*j),
            BinaryOp::Mul => i.checked_mul(*j),
            BinaryOp::Mod => i
                .checked_rem(*j)
                .map(|r| if r != 0 && (r < 0) != (*j < 0) { r + j } else { r }),
            BinaryOp::Pow => u32::try_from(*j).ok().and_then(|e| i.checked_pow(e)),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::Int(v));
        }
    }
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Ok(Value::Null);
            }
            x / y
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Ok(Value::Null);
            }
            float_mod(x, y)
        }
        _ => x.powf(y),
    };
    Ok(if result.is_finite() {
        Value::Float(result)
    } else {
        Value::Null
    })
}

fn comparison(op: BinaryOp, a: &Value, b: &Value) -> Eval {
    use std::cmp::Ordering;
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(a.loose_eq(b))),
        BinaryOp::Ne => return Ok(Value::Bool(!a.loose_eq(b))),
        _ => {}
    }
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let ord = a
        .compare(b)
        .ok_or_else(|| type_error("comparison", a, b))?;
    let result = match op {
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Le => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

fn truth(v: &Value) -> std::result::Result<Option<bool>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(format!("expected a boolean, got {}", other.type_name())),
    }
}

/// Three-valued `and` / `or`.
fn logic(op: BinaryOp, a: &Value, b: &Value) -> Eval {
    let (x, y) = (truth(a)?, truth(b)?);
    let result = match op {
        BinaryOp::And => match (x, y) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        _ => match (x, y) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    Ok(result.map_or(Value::Null, Value::Bool))
}

#[allow(clippy::cast_possible_truncation)]
fn call(function: Function, args: &[Value]) -> Eval {
    let first = args.first().unwrap_or(&Value::Null);
    match function {
        Function::Coalesce => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or_default()),
        Function::Concat => Ok(Value::Text(
            args.iter()
                .filter(|v| !v.is_null())
                .map(ToString::to_string)
                .collect(),
        )),
        _ if first.is_null() => Ok(Value::Null),
        Function::Abs => match first {
            Value::Int(i) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Int)),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(format!("abs() expects a number, got {}", other.type_name())),
        },
        Function::Round => {
            let digits = match args.get(1) {
                None => 0,
                Some(Value::Int(d)) => i32::try_from(*d).map_err(|_| "round() digits out of range".to_string())?,
                Some(other) => {
                    return Err(format!("round() digits must be an integer, got {}", other.type_name()))
                }
            };
            match first {
                Value::Int(i) if digits >= 0 => Ok(Value::Int(*i)),
                v => {
                    let x = v
                        .as_f64()
                        .ok_or_else(|| format!("round() expects a number, got {}", v.type_name()))?;
                    // Past f64's decimal range the scale over- or underflows.
                    let digits = digits.clamp(-308, 308);
                    let scale = 10f64.powi(digits);
                    let scaled = x * scale;
                    let rounded = if scaled.is_finite() {
                        scaled.round() / scale
                    } else {
                        x
                    };
                    if digits == 0 && rounded.abs() < 9.0e15 {
                        Ok(Value::Int(rounded as i64))
                    } else {
                        Ok(Value::Float(rounded))
                    }
                }
            }
        }
        Function::Upper => Ok(Value::Text(first.to_string().to_uppercase())),
        Function::Lower => Ok(Value::Text(first.to_string().to_lowercase())),
        Function::Len => match first {
            Value::List(items) => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
            v => Ok(Value::Int(
                i64::try_from(v.to_string().chars().count()).unwrap_or(i64::MAX),
            )),
        },
    }
}

impl Expr {
    /// Every column the expression references.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Column(name) => {
                out.insert(name.as_str());
            }
            Self::Unary(_, e) => e.collect_columns(out),
            Self::Binary(a, _, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_columns(out)),
        }
    }

    /// Evaluate against one record. Missing cells read as null.
    ///
    /// # Errors
    ///
    /// A message describing the type mismatch.
    pub fn eval(&self, record: &Record) -> Eval {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Column(name) => Ok(record.get(name).cloned().unwrap_or_default()),
            Self::Unary(op, inner) => {
                let v = inner.eval(record)?;
                match (op, &v) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Neg, Value::Int(i)) => Ok(i
                        .checked_neg()
                        .map_or(Value::Float(-(*i as f64)), Value::Int)),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, other) => Err(format!("cannot negate {}", other.type_name())),
                    (UnaryOp::Not, other) => Err(format!("cannot apply 'not' to {}", other.type_name())),
                }
            }
            Self::Binary(a, op, b) => {
                let (x, y) = (a.eval(record)?, b.eval(record)?);
                match op {
                    BinaryOp::Add
                    | BinaryOp::Sub
                    | BinaryOp::Mul
                    | BinaryOp::Div
                    | BinaryOp::Mod
                    | BinaryOp::Pow => arithmetic(*op, &x, &y),
                    BinaryOp::And | BinaryOp::Or => logic(*op, &x, &y),
                    _ => comparison(*op, &x, &y),
                }
            }
            Self::Call(function, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(record))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                call(*function, &values)
            }
        }
    }
}
