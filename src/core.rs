//! Loosely-typed values carried by plan instructions and run metadata.
//!
//! Instruction arguments (`set` targets, `configure` keyword arguments) and
//! the metadata of a start document hold a [`ParameterValue`]. Conversions
//! are lenient in the same way operators type values at a prompt: `"7"`
//! reads as an integer, `2.0` reads as an integer, and a missing optional
//! setting becomes [`ParameterValue::Null`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of an instruction argument or metadata entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    /// Flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Text, including device names
    String(String),
    /// List of values
    Array(Vec<ParameterValue>),
    /// Unset optional setting; renders as `None`
    Null,
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Null => f.write_str("None"),
            Self::Array(items) => {
                f.write_str("[")?;
                let mut sep = "";
                for item in items {
                    write!(f, "{sep}{item}")?;
                    sep = ", ";
                }
                f.write_str("]")
            }
        }
    }
}

impl ParameterValue {
    /// Numeric view; text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer view; whole floats and numeric text convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Flag view; `"true"` and `"false"` convert.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Int(value)
    }
}

impl From<u64> for ParameterValue {
    fn from(value: u64) -> Self {
        ParameterValue::Int(value as i64)
    }
}

impl From<u32> for ParameterValue {
    fn from(value: u32) -> Self {
        ParameterValue::Int(i64::from(value))
    }
}

impl From<usize> for ParameterValue {
    fn from(value: usize) -> Self {
        ParameterValue::Int(value as i64)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_owned())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<Vec<f64>> for ParameterValue {
    fn from(value: Vec<f64>) -> Self {
        ParameterValue::Array(value.into_iter().map(ParameterValue::Float).collect())
    }
}

impl<T: Into<ParameterValue>> From<Option<T>> for ParameterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(ParameterValue::Int(4).as_f64(), Some(4.0));
        assert_eq!(ParameterValue::Float(2.0).as_i64(), Some(2));
        assert_eq!(ParameterValue::Float(2.5).as_i64(), None);
        assert_eq!(ParameterValue::from(" 7").as_i64(), Some(7));
        assert_eq!(ParameterValue::Bool(true).as_f64(), None);
        assert_eq!(ParameterValue::from("false").as_bool(), Some(false));
    }

    #[test]
    fn test_missing_setting_is_null() {
        let none: Option<u64> = None;
        assert_eq!(ParameterValue::from(none), ParameterValue::Null);
        assert_eq!(ParameterValue::from(Some(10u64)), ParameterValue::Int(10));
    }

    #[test]
    fn test_display() {
        let value = ParameterValue::Array(vec!["x".into(), 2i64.into(), ParameterValue::Null]);
        assert_eq!(value.to_string(), "[x, 2, None]");
        assert_eq!(ParameterValue::from(vec![0.5]).to_string(), "[0.5]");
    }
}
