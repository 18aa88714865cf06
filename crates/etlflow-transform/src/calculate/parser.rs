//! Parse CALCULATE expressions into an [`Expr`] tree.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use etlflow_types::Value;

use super::expr::{BinaryOp, Expr, Function, UnaryOp};
use crate::error::{Result, TransformError};

#[derive(Parser)]
#[grammar = "calculate/expression.pest"]
struct ExpressionParser;

/// Parse a complete expression.
///
/// # Errors
///
/// Config error with the parser's position report on malformed input or
/// an unknown function.
pub fn parse(input: &str) -> Result<Expr> {
    let mut pairs = ExpressionParser::parse(Rule::calculation, input)
        .map_err(|e| TransformError::config(format!("invalid expression: {e}")))?;
    let calculation = pairs
        .next()
        .ok_or_else(|| TransformError::config("no expression found"))?;
    let expr = calculation
        .into_inner()
        .next()
        .ok_or_else(|| TransformError::config("no expression found inside calculation"))?;
    build(expr)
}

fn first_inner(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| TransformError::config(format!("empty {rule:?} in expression")))
}

fn build(pair: Pair<'_, Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::expr => build(first_inner(pair)?),
        Rule::or_expr
        | Rule::and_expr
        | Rule::comp_expr
        | Rule::add_expr
        | Rule::mul_expr => build_left_assoc(pair),
        Rule::pow_expr => {
            let mut inner = pair.into_inner();
            let base = inner
                .next()
                .ok_or_else(|| TransformError::config("missing base in power expression"))?;
            let base = build(base)?;
            match (inner.next(), inner.next()) {
                (Some(_), Some(exponent)) => Ok(Expr::Binary(
                    Box::new(base),
                    BinaryOp::Pow,
                    Box::new(build(exponent)?),
                )),
                _ => Ok(base),
            }
        }
        Rule::unary_expr => {
            let mut ops = Vec::new();
            let mut operand = None;
            for p in pair.into_inner() {
                if p.as_rule() == Rule::unary_op {
                    ops.push(match p.as_str() {
                        "-" => UnaryOp::Neg,
                        _ => UnaryOp::Not,
                    });
                } else {
                    operand = Some(build(p)?);
                }
            }
            let mut expr =
                operand.ok_or_else(|| TransformError::config("missing operand after unary operator"))?;
            for op in ops.into_iter().rev() {
                expr = Expr::Unary(op, Box::new(expr));
            }
            Ok(expr)
        }
        Rule::number => {
            let raw = pair.as_str();
            if raw.contains(['.', 'e', 'E']) {
                raw.parse::<f64>()
                    .map(|f| Expr::Literal(Value::Float(f)))
                    .map_err(|e| TransformError::config(format!("invalid number '{raw}': {e}")))
            } else {
                Ok(Expr::Literal(raw.parse::<i64>().map_or_else(
                    |_| Value::Float(raw.parse::<f64>().unwrap_or(f64::INFINITY)),
                    Value::Int,
                )))
            }
        }
        Rule::string_lit => {
            let text = pair.into_inner().next().map_or("", |p| p.as_str());
            Ok(Expr::Literal(Value::Text(text.to_string())))
        }
        Rule::bool_lit => Ok(Expr::Literal(Value::Bool(
            pair.as_str().eq_ignore_ascii_case("true"),
        ))),
        Rule::null_lit => Ok(Expr::Literal(Value::Null)),
        Rule::column => {
            let name = first_inner(pair)?;
            Ok(Expr::Column(name.as_str().to_string()))
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner
                .next()
                .ok_or_else(|| TransformError::config("missing function name"))?;
            let args = inner.map(build).collect::<Result<Vec<_>>>()?;
            let function = Function::resolve(name.as_str(), args.len())?;
            Ok(Expr::Call(function, args))
        }
        other => Err(TransformError::config(format!(
            "unexpected {other:?} in expression"
        ))),
    }
}

fn binary_op(op: &str) -> Result<BinaryOp> {
    let op = match op.to_ascii_lowercase().as_str() {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "&&" | "and" => BinaryOp::And,
        "||" | "or" => BinaryOp::Or,
        other => return Err(TransformError::config(format!("unknown operator '{other}'"))),
    };
    Ok(op)
}

fn build_left_assoc(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| TransformError::config("missing left operand"))?;
    let mut expr = build(first)?;
    while let Some(op) = inner.next() {
        let op = binary_op(op.as_str())?;
        let right = inner
            .next()
            .ok_or_else(|| TransformError::config("missing right operand"))?;
        expr = Expr::Binary(Box::new(expr), op, Box::new(build(right)?));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.to_string()))
    }

    #[test]
    fn precedence_and_associativity() {
        let e = parse("a + b * 2").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                col("a"),
                BinaryOp::Add,
                Box::new(Expr::Binary(col("b"), BinaryOp::Mul, Box::new(Expr::Literal(Value::Int(2))))),
            )
        );
        let e = parse("2 ^ 3 ^ 2").unwrap();
        assert!(matches!(e, Expr::Binary(_, BinaryOp::Pow, ref rhs) if matches!(**rhs, Expr::Binary(_, BinaryOp::Pow, _))));
        let e = parse("a - b - c").unwrap();
        assert!(matches!(e, Expr::Binary(ref lhs, BinaryOp::Sub, _) if matches!(**lhs, Expr::Binary(_, BinaryOp::Sub, _))));
    }

    #[test]
    fn literals_and_quoted_columns() {
        assert!(parse("'it''").is_err());
        assert_eq!(parse("\"\"").unwrap(), Expr::Literal(Value::Text(String::new())));
        assert_eq!(parse("[unit price]").unwrap(), Expr::Column("unit price".into()));
        assert_eq!(parse("TRUE").unwrap(), Expr::Literal(Value::Bool(true)));
        assert_eq!(parse("null").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(parse("1.5e2").unwrap(), Expr::Literal(Value::Float(150.0)));
    }

    #[test]
    fn keyword_operators() {
        let e = parse("not active and score >= 10 or vip").unwrap();
        assert!(matches!(e, Expr::Binary(_, BinaryOp::Or, _)));
        // identifiers that start with a keyword stay identifiers
        assert_eq!(parse("orders").unwrap(), Expr::Column("orders".into()));
        assert_eq!(parse("notes").unwrap(), Expr::Column("notes".into()));
    }

    #[test]
    fn functions_are_resolved_with_arity() {
        assert!(matches!(parse("round(price, 2)").unwrap(), Expr::Call(Function::Round, _)));
        assert!(parse("round()").unwrap_err().is_config());
        assert!(parse("explode(x)").unwrap_err().is_config());
    }

    #[test]
    fn malformed_input_is_config_error() {
        for bad in ["", "a +", "(a", "a b", "1 == == 2"] {
            assert!(parse(bad).unwrap_err().is_config(), "{bad}");
        }
    }
}
