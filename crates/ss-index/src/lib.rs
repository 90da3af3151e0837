#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("row position {position} is out of bounds for index of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self { labels }
    }

    /// Row ids `start..start + len`.
    #[must_use]
    pub fn range(start: i64, len: usize) -> Self {
        Self::new((0..len).map(|offset| IndexLabel::Int64(start + offset as i64)).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::<&IndexLabel>::with_capacity(self.labels.len());
        self.labels.iter().any(|label| !seen.insert(label))
    }

    /// True when every label of `self` also appears in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        let universe = other.labels.iter().collect::<HashSet<_>>();
        self.labels.iter().all(|label| universe.contains(label))
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, IndexError> {
        let labels = positions
            .iter()
            .map(|&position| {
                self.labels
                    .get(position)
                    .cloned()
                    .ok_or(IndexError::PositionOutOfBounds {
                        position,
                        len: self.labels.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(labels))
    }

    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut labels = Vec::with_capacity(self.len() + other.len());
        labels.extend_from_slice(&self.labels);
        labels.extend_from_slice(&other.labels);
        Self::new(labels)
    }
}
