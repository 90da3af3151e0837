#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ss_columnar::{Column, ColumnError};
use ss_index::{Index, IndexError, IndexLabel};
use ss_types::Scalar;
use thiserror::Error;

/// Column names of the flight-delay datasets.
pub mod columns {
    pub const MONTH: &str = "Month";
    pub const DAY_OF_WEEK: &str = "DayOfWeek";
    pub const CRS_DEP_TIME: &str = "CRSDepTime";
    pub const AIRLINE: &str = "Airline";
    pub const ORIGIN: &str = "Origin";
    pub const DEP_TIME_BLK: &str = "DepTimeBlk";
    pub const DEP_DELAY_MINUTES: &str = "DepDelayMinutes";
    pub const DISTANCE: &str = "Distance";
    pub const CANCELLED: &str = "Cancelled";
    pub const DIVERTED: &str = "Diverted";
    pub const DEP_DEL15: &str = "DepDel15";
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("row mask length ({mask_len}) does not match frame height ({height})")]
    MaskLengthMismatch { mask_len: usize, height: usize },
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    index: Index,
    column: Column,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: column.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            index,
            column,
        })
    }

    pub fn from_values(
        name: impl Into<String>,
        index_labels: Vec<IndexLabel>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let index = Index::new(index_labels);
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }
}

/// Row-labelled table with named columns kept in source header order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    index: Index,
    order: Vec<String>,
    columns: BTreeMap<String, Column>,
}

impl DataFrame {
    pub fn new(index: Index, columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let mut order = Vec::with_capacity(columns.len());
        let mut by_name = BTreeMap::new();

        for (name, column) in columns {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
            if by_name.contains_key(&name) {
                return Err(FrameError::DuplicateColumn(name));
            }
            order.push(name.clone());
            by_name.insert(name, column);
        }

        Ok(Self {
            index,
            order,
            columns: by_name,
        })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            index: Index::new(Vec::new()),
            order: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Column names in header order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Names from `required` that this frame lacks, in the order given.
    #[must_use]
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.has_column(name))
            .map(|name| (*name).to_owned())
            .collect()
    }

    pub fn series(&self, name: &str) -> Option<Result<Series, FrameError>> {
        self.column(name)
            .map(|column| Series::new(name, self.index.clone(), column.clone()))
    }

    /// Keep the rows whose mask bit is set, preserving order and row labels.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self, FrameError> {
        if mask.len() != self.height() {
            return Err(FrameError::MaskLengthMismatch {
                mask_len: mask.len(),
                height: self.height(),
            });
        }

        let positions = mask
            .iter()
            .enumerate()
            .filter_map(|(position, keep)| keep.then_some(position))
            .collect::<Vec<_>>();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rows_in = self.height(),
            rows_out = positions.len(),
            "frame.filter_rows"
        );

        self.take(&positions)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let index = self.index.take(positions)?;
        let columns = self
            .order
            .iter()
            .map(|name| {
                let column = self.columns[name].take(positions)?;
                Ok((name.clone(), column))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(index, columns)
    }

    pub fn head(&self, rows: usize) -> Result<Self, FrameError> {
        let positions = (0..rows.min(self.height())).collect::<Vec<_>>();
        self.take(&positions)
    }

    /// Stack `other` below `self`. The result carries the union of both
    /// column sets; a column one side lacks is missing for that side's rows.
    /// Columns whose types cannot be reconciled are rendered as text.
    pub fn concat(&self, other: &Self) -> Result<Self, FrameError> {
        let mut order = self.order.clone();
        for name in &other.order {
            if !self.columns.contains_key(name) {
                order.push(name.clone());
            }
        }

        let columns = order
            .into_iter()
            .map(|name| {
                let top = self.columns.get(&name);
                let bottom = other.columns.get(&name);
                let dtype = top.or(bottom).map(Column::dtype).unwrap_or(ss_types::DType::Null);
                let top = top
                    .cloned()
                    .unwrap_or_else(|| Column::missing(dtype, self.height()));
                let bottom = bottom
                    .cloned()
                    .unwrap_or_else(|| Column::missing(dtype, other.height()));
                let stacked = match top.concat(&bottom) {
                    Ok(column) => column,
                    Err(_) => top.to_text().concat(&bottom.to_text())?,
                };
                Ok((name, stacked))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            top_rows = self.height(),
            bottom_rows = other.height(),
            columns = columns.len(),
            "frame.concat"
        );

        Self::new(self.index.concat(&other.index), columns)
    }
}
