#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
}

/// A single cell of a flight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    /// Parse one delimited field. Empty cells are missing; integers, floats and
    /// `true`/`false` in any letter case are recognised before falling back to
    /// text.
    #[must_use]
    pub fn parse_field(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Self::Null(NullKind::Null);
        }

        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::Int64(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Self::Float64(value);
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }

        Self::Utf8(trimmed.to_owned())
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) if v.is_nan() => Err(TypeError::ValueIsMissing {
                kind: NullKind::NaN,
            }),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
        }
    }

    /// Integer view of a numeric cell. Floats must carry no fractional part.
    pub fn to_i64(&self) -> Result<i64, TypeError> {
        match cast_scalar(self, DType::Int64)? {
            Self::Int64(v) => Ok(v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind }),
            other => Err(TypeError::InvalidCast {
                from: other.dtype(),
                to: DType::Int64,
            }),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Whether a 0/1 indicator cell is set. Booleans, integers and floats all
    /// count; a missing cell is never set.
    #[must_use]
    pub fn is_flag_set(&self) -> bool {
        self.to_f64().is_ok_and(|v| v == 1.0)
    }

    /// Total order used for sorting category keys: missing first, then
    /// booleans, numbers (compared as f64) and text.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        fn rank(value: &Scalar) -> u8 {
            match value {
                Scalar::Null(_) => 0,
                Scalar::Float64(v) if v.is_nan() => 0,
                Scalar::Bool(_) => 1,
                Scalar::Int64(_) | Scalar::Float64(_) => 2,
                Scalar::Utf8(_) => 3,
            }
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (left, right) if rank(left) == 2 && rank(right) == 2 => {
                let lhs = left.to_f64().unwrap_or_default();
                let rhs = right.to_f64().unwrap_or_default();
                lhs.total_cmp(&rhs)
            }
            (left, right) => rank(left).cmp(&rank(right)),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(_) => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) if v.is_nan() => Ok(()),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
}

pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool, Float64) | (Float64, Bool) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(current, value.dtype())?;
    }
    Ok(current)
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if from == target || matches!(value, Scalar::Null(_)) {
        return Ok(match value {
            Scalar::Null(_) => Scalar::missing_for_dtype(target),
            _ => value.clone(),
        });
    }

    match (target, value) {
        (DType::Null, _) => Ok(Scalar::Null(NullKind::Null)),
        (DType::Int64, Scalar::Bool(v)) => Ok(Scalar::Int64(i64::from(*v))),
        (DType::Int64, Scalar::Float64(v)) => {
            if !v.is_finite() || *v != v.trunc() || *v < i64::MIN as f64 || *v > i64::MAX as f64 {
                return Err(TypeError::LossyFloatToInt { value: *v });
            }
            Ok(Scalar::Int64(*v as i64))
        }
        (DType::Float64, Scalar::Bool(v)) => Ok(Scalar::Float64(if *v { 1.0 } else { 0.0 })),
        (DType::Float64, Scalar::Int64(v)) => Ok(Scalar::Float64(*v as f64)),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}
