use serde::{Deserialize, Serialize};
use std::fmt;

/// A value produced while evaluating a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Empty,
    Bool(bool),
    Number(f64),
    String(String),
    Error(ErrorValue),
    /// Row-major block of values produced by a range reference.
    Array(Vec<Vec<Value>>),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Iterate over every scalar, flattening arrays.
    pub fn scalars(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::Array(rows) => Box::new(rows.iter().flatten().flat_map(Value::scalars)),
            other => Box::new(std::iter::once(other)),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ErrorValue> for Value {
    fn from(err: ErrorValue) -> Self {
        Value::Error(err)
    }
}

/// Error types for cell values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorValue {
    Div0,  // #DIV/0!
    Name,  // #NAME?
    Value, // #VALUE!
    Ref,   // #REF!
    Null,  // #NULL!
    Num,   // #NUM!
    NA,    // #N/A
}

impl ErrorValue {
    /// Excel-style error label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Div0 => "#DIV/0!",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Null => "#NULL!",
            Self::Num => "#NUM!",
            Self::NA => "#N/A",
        }
    }

    /// Parse an Excel error literal such as `#DIV/0!`.
    pub fn from_label(label: &str) -> Option<Self> {
        let found = match label.to_ascii_uppercase().as_str() {
            "#DIV/0!" => Self::Div0,
            "#NAME?" => Self::Name,
            "#VALUE!" => Self::Value,
            "#REF!" => Self::Ref,
            "#NULL!" => Self::Null,
            "#NUM!" => Self::Num,
            "#N/A" => Self::NA,
            _ => return None,
        };
        Some(found)
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_labels_round_trip() {
        for err in [
            ErrorValue::Div0,
            ErrorValue::Name,
            ErrorValue::Value,
            ErrorValue::Ref,
            ErrorValue::Null,
            ErrorValue::Num,
            ErrorValue::NA,
        ] {
            assert_eq!(ErrorValue::from_label(err.label()), Some(err));
        }
        assert_eq!(ErrorValue::from_label("#n/a"), Some(ErrorValue::NA));
        assert_eq!(ErrorValue::from_label("#BOGUS"), None);
    }

    #[test]
    fn test_scalars_flatten_arrays() {
        let value = Value::Array(vec![
            vec![Value::Number(1.0), Value::Empty],
            vec![Value::from("x"), Value::Bool(true)],
        ]);
        let flat: Vec<&Value> = value.scalars().collect();
        assert_eq!(flat.len(), 4);
        assert_eq!(flat[2], &Value::String("x".to_string()));
    }
}
