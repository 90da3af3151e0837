#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use ss_types::{DType, Scalar, TypeError, cast_scalar, infer_dtype};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ge,
    Le,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("row position {position} is out of bounds for column of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing every value to `dtype`.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let coerced = values
            .into_iter()
            .map(|value| {
                if value.dtype() == dtype {
                    Ok(value)
                } else {
                    cast_scalar(&value, dtype)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    /// Text column built from raw cells; empty cells stay missing.
    #[must_use]
    pub fn from_text(cells: Vec<String>) -> Self {
        let values = cells
            .into_iter()
            .map(|cell| {
                let trimmed = cell.trim();
                if trimmed.is_empty() {
                    Scalar::missing_for_dtype(DType::Utf8)
                } else {
                    Scalar::Utf8(trimmed.to_owned())
                }
            })
            .collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype: DType::Utf8,
            values,
            validity,
        }
    }

    #[must_use]
    pub fn missing(dtype: DType, len: usize) -> Self {
        let values = vec![Scalar::missing_for_dtype(dtype); len];
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype,
            values,
            validity,
        }
    }

    /// Re-render every cell as text. Used when two sources disagree on a
    /// column's type.
    #[must_use]
    pub fn to_text(&self) -> Self {
        Self::from_text(self.values.iter().map(ToString::to_string).collect())
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Gather rows by position, keeping the column dtype.
    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|&position| {
                self.values
                    .get(position)
                    .cloned()
                    .ok_or(ColumnError::PositionOutOfBounds {
                        position,
                        len: self.values.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype: self.dtype,
            values,
            validity,
        })
    }

    /// Append `other` below `self`, widening to the common dtype.
    pub fn concat(&self, other: &Self) -> Result<Self, ColumnError> {
        let dtype = ss_types::common_dtype(self.dtype, other.dtype)?;
        let values = self
            .values
            .iter()
            .chain(other.values.iter())
            .cloned()
            .collect::<Vec<_>>();
        Self::new(dtype, values)
    }

    /// Row mask for `value <op> rhs`. Missing cells never match, and neither
    /// do cells that cannot be compared with `rhs`.
    #[must_use]
    pub fn compare_scalar(&self, op: ComparisonOp, rhs: &Scalar) -> Vec<bool> {
        self.values
            .iter()
            .map(|value| compare_cells(value, op, rhs))
            .collect()
    }

    /// Row mask for membership in `candidates`.
    #[must_use]
    pub fn is_in(&self, candidates: &[Scalar]) -> Vec<bool> {
        self.values
            .iter()
            .map(|value| {
                candidates
                    .iter()
                    .any(|candidate| compare_cells(value, ComparisonOp::Eq, candidate))
            })
            .collect()
    }

    /// Smallest and largest non-missing numeric value.
    #[must_use]
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .filter_map(|value| value.to_f64().ok())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

fn compare_cells(value: &Scalar, op: ComparisonOp, rhs: &Scalar) -> bool {
    if value.is_missing() || rhs.is_missing() {
        return false;
    }

    match (value, rhs) {
        (Scalar::Utf8(left), Scalar::Utf8(right)) => match op {
            ComparisonOp::Eq => left == right,
            ComparisonOp::Ge => left >= right,
            ComparisonOp::Le => left <= right,
        },
        (Scalar::Utf8(_), _) | (_, Scalar::Utf8(_)) => false,
        _ => match (value.to_f64(), rhs.to_f64()) {
            (Ok(lhs), Ok(rhs)) => match op {
                ComparisonOp::Eq => lhs == rhs,
                ComparisonOp::Ge => lhs >= rhs,
                ComparisonOp::Le => lhs <= rhs,
            },
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use ss_types::{DType, NullKind, Scalar};

    use super::{Column, ColumnError, ComparisonOp};

    #[test]
    fn take_gathers_rows_in_requested_order() {
        let column = Column::from_values(vec![
            Scalar::Int64(10),
            Scalar::Int64(20),
            Scalar::Int64(30),
        ])
        .expect("column should build");

        let out = column.take(&[2, 0]).expect("take should work");
        assert_eq!(out.values(), &[Scalar::Int64(30), Scalar::Int64(10)]);

        let err = column.take(&[3]).expect_err("out of bounds");
        assert!(matches!(
            err,
            ColumnError::PositionOutOfBounds { position: 3, len: 3 }
        ));
    }

    #[test]
    fn comparisons_never_match_missing_cells() {
        let column = Column::from_values(vec![
            Scalar::Float64(5.0),
            Scalar::Null(NullKind::NaN),
            Scalar::Int64(45),
        ])
        .expect("column");

        assert_eq!(
            column.compare_scalar(ComparisonOp::Ge, &Scalar::Int64(5)),
            vec![true, false, true]
        );
        assert_eq!(
            column.compare_scalar(ComparisonOp::Le, &Scalar::Float64(10.0)),
            vec![true, false, false]
        );
    }

    #[test]
    fn is_in_matches_numeric_and_text_members() {
        let days = Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(6), Scalar::Int64(7)])
            .expect("days");
        assert_eq!(
            days.is_in(&[Scalar::Int64(6), Scalar::Int64(7)]),
            vec![false, true, true]
        );
        assert_eq!(days.is_in(&[]), vec![false, false, false]);

        let airlines = Column::from_text(vec!["AA".to_owned(), String::new(), "DL".to_owned()]);
        assert_eq!(
            airlines.is_in(&[Scalar::from("DL")]),
            vec![false, false, true]
        );
        assert_eq!(airlines.validity().count_valid(), 2);
    }

    #[test]
    fn concat_widens_to_common_dtype() {
        let left = Column::from_values(vec![Scalar::Int64(1)]).expect("left");
        let right = Column::from_values(vec![Scalar::Float64(2.5)]).expect("right");
        let out = left.concat(&right).expect("concat");
        assert_eq!(out.dtype(), DType::Float64);
        assert_eq!(out.values(), &[Scalar::Float64(1.0), Scalar::Float64(2.5)]);

        let text = Column::from_text(vec!["N12".to_owned()]);
        assert!(left.concat(&text).is_err());
        let rendered = left.to_text().concat(&text).expect("text concat");
        assert_eq!(
            rendered.values(),
            &[Scalar::from("1"), Scalar::from("N12")]
        );
    }

    #[test]
    fn numeric_bounds_skip_missing() {
        let column = Column::from_values(vec![
            Scalar::Float64(f64::NAN),
            Scalar::Float64(-3.0),
            Scalar::Float64(120.0),
        ])
        .expect("column");
        assert_eq!(column.numeric_bounds(), Some((-3.0, 120.0)));
        assert_eq!(Column::missing(DType::Float64, 2).numeric_bounds(), None);
    }
}
