//! CALCULATE: derive a column from an expression.
//!
//! Expressions support arithmetic (`+ - * / % ^`), comparisons, `and`/`or`/
//! `not` (also `&& || !`), string and numeric literals, `true`/`false`/
//! `null`, column references (bare identifiers or `[quoted name]`), and the
//! functions `abs`, `round`, `upper`, `lower`, `len`, `concat`, `coalesce`.
//!
//! Nulls propagate through arithmetic and ordering comparisons. Division and
//! modulo by zero yield null. `+` on two strings concatenates.

mod expr;
mod parser;

use etlflow_types::Record;
use serde::{Deserialize, Serialize};

use crate::config::ensure_non_empty_column;
use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

pub use expr::{BinaryOp, Expr, Function, UnaryOp};
pub use parser::parse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculateConfig {
    /// Output column; overwritten if it already exists.
    pub column: String,
    pub expression: String,
}

impl CalculateConfig {
    /// Parse the expression.
    ///
    /// # Errors
    ///
    /// Config error for a blank target column or an invalid expression.
    pub fn compile(&self) -> Result<Expr> {
        ensure_non_empty_column(&self.column, "column")?;
        parse(&self.expression)
    }
}

/// Evaluate the expression for each record into `config.column`.
///
/// # Errors
///
/// Config error for a bad expression; data error when a referenced column is
/// absent (checked before any row is evaluated) or a row hits a type
/// mismatch.
pub fn calculate(dataset: &[Record], config: &CalculateConfig) -> Result<TransformOutput> {
    let expr = config.compile()?;
    let referenced: Vec<&str> = expr.columns().into_iter().collect();
    require_columns(dataset, &referenced)?;

    let mut data = Vec::with_capacity(dataset.len());
    let mut null_results = 0;
    for (row, record) in dataset.iter().enumerate() {
        let value = expr
            .eval(record)
            .map_err(|message| TransformError::at_row(config.column.clone(), row, message))?;
        if value.is_null() {
            null_results += 1;
        }
        let mut out = record.clone();
        out.insert(config.column.clone(), value);
        data.push(out);
    }

    tracing::debug!(column = %config.column, null_results, "calculate complete");
    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Calculate {
            column: config.column.clone(),
            null_results,
        },
    ))
}
