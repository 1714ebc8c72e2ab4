use serde::{Deserialize, Serialize};
use sheetstore_primitives::datetime::format_serial;
use sheetstore_primitives::Value;
use std::fmt;

/// Display format attached to a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NumberFormat {
    #[default]
    General,
    /// The number is an Excel serial date.
    Date,
}

/// Stored content of a non-blank cell.
///
/// Blank cells are never stored; a sheet simply has no entry for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Expression without the leading `=`.
    Formula(String),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Formula(expr) => write!(f, "={expr}"),
        }
    }
}

/// A cell: its value plus how the value is displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    #[serde(default)]
    pub format: NumberFormat,
}

impl Cell {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::general(CellValue::Text(text.into()))
    }

    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::general(CellValue::Number(n))
    }

    #[must_use]
    pub fn boolean(b: bool) -> Self {
        Self::general(CellValue::Bool(b))
    }

    /// A formula cell; a leading `=` is stripped.
    #[must_use]
    pub fn formula(expr: &str) -> Self {
        let expr = expr.trim();
        let expr = expr.strip_prefix('=').unwrap_or(expr);
        Self::general(CellValue::Formula(expr.to_string()))
    }

    /// A date stored as an Excel serial number.
    #[must_use]
    pub fn date(serial: f64) -> Self {
        Self {
            value: CellValue::Number(serial),
            format: NumberFormat::Date,
        }
    }

    fn general(value: CellValue) -> Self {
        Self {
            value,
            format: NumberFormat::General,
        }
    }

    #[must_use]
    pub fn is_date(&self) -> bool {
        self.format == NumberFormat::Date && matches!(self.value, CellValue::Number(_))
    }

    /// The stored expression of a formula cell.
    #[must_use]
    pub fn formula_source(&self) -> Option<&str> {
        match &self.value {
            CellValue::Formula(expr) => Some(expr),
            _ => None,
        }
    }

    /// Literal value of a non-formula cell.
    #[must_use]
    pub fn literal(&self) -> Option<Value> {
        match &self.value {
            CellValue::Text(s) => Some(Value::String(s.clone())),
            CellValue::Number(n) => Some(Value::Number(*n)),
            CellValue::Bool(b) => Some(Value::Bool(*b)),
            CellValue::Formula(_) => None,
        }
    }

    /// Date cells render as `YYYY-MM-DD[ HH:MM:SS]`.
    #[must_use]
    pub fn date_text(&self) -> Option<String> {
        match self.value {
            CellValue::Number(serial) if self.is_date() => format_serial(serial),
            _ => None,
        }
    }
}
