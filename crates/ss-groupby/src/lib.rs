#![forbid(unsafe_code)]

mod views;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ss_columnar::{Column, ColumnError};
use ss_frame::{DataFrame, FrameError, Series};
use ss_index::{Index, IndexError, IndexLabel};
use ss_types::{NullKind, Scalar};
use thiserror::Error;

pub use views::{
    Aggregated, AirlinePoints, CancellationTotals, ChartSelections, DelayMetric, HourlyDelay,
    ScatterPoint, SelectionSizes, average_delay_by_hour, average_delay_by_origin_day,
    cancellation_totals, delay_percentage, delay_rate_by_time_block, distance_vs_delay,
    top_origins,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupByOptions {
    pub dropna: bool,
}

impl Default for GroupByOptions {
    fn default() -> Self {
        Self { dropna: true }
    }
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("key series has {keys} rows but value series has {values}, or their labels differ")]
    Misaligned { keys: usize, values: usize },
    #[error("column not found: {0}")]
    MissingColumn(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduction {
    Sum,
    Mean,
    Count,
}

impl Reduction {
    fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
        }
    }

    /// `None` drops the group from the output.
    fn finish(self, acc: Accumulator) -> Option<Scalar> {
        match self {
            Self::Sum => Some(Scalar::Float64(acc.sum)),
            Self::Mean => acc.mean().map(Scalar::Float64),
            Self::Count => Some(Scalar::Int64(acc.present as i64)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Accumulator {
    sum: f64,
    count: usize,
    present: usize,
}

impl Accumulator {
    /// Missing cells are ignored; text cells only count towards `present`.
    fn add(&mut self, value: &Scalar) {
        if !value.is_missing() {
            self.present += 1;
        }
        if let Ok(v) = value.to_f64() {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Sum of `values` per distinct key, in first-seen key order.
pub fn groupby_sum(
    keys: &Series,
    values: &Series,
    options: GroupByOptions,
) -> Result<Series, GroupByError> {
    groupby_reduce(keys, values, options, Reduction::Sum)
}

/// Mean of `values` per distinct key. Groups without a single valid value
/// are dropped.
pub fn groupby_mean(
    keys: &Series,
    values: &Series,
    options: GroupByOptions,
) -> Result<Series, GroupByError> {
    groupby_reduce(keys, values, options, Reduction::Mean)
}

/// Number of non-missing values per distinct key.
pub fn groupby_count(
    keys: &Series,
    values: &Series,
    options: GroupByOptions,
) -> Result<Series, GroupByError> {
    groupby_reduce(keys, values, options, Reduction::Count)
}

fn groupby_reduce(
    keys: &Series,
    values: &Series,
    options: GroupByOptions,
    reduction: Reduction,
) -> Result<Series, GroupByError> {
    if keys.index() != values.index() {
        return Err(GroupByError::Misaligned {
            keys: keys.len(),
            values: values.len(),
        });
    }

    let groups = match try_group_dense_int64(keys.values(), values.values(), options.dropna) {
        Some(groups) => groups,
        None => group_generic(keys.values(), values.values(), options.dropna),
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        reduction = reduction.name(),
        rows = keys.len(),
        groups = groups.len(),
        "groupby"
    );

    let mut out_index = Vec::with_capacity(groups.len());
    let mut out_values = Vec::with_capacity(groups.len());
    for (key, acc) in groups {
        if let Some(value) = reduction.finish(acc) {
            out_index.push(label_for(key));
            out_values.push(value);
        }
    }

    let out_column = Column::from_values(out_values)?;
    Ok(Series::new(
        reduction.name(),
        Index::new(out_index),
        out_column,
    )?)
}

fn label_for(key: Scalar) -> IndexLabel {
    match key {
        Scalar::Int64(v) => IndexLabel::Int64(v),
        Scalar::Utf8(v) => IndexLabel::Utf8(v),
        Scalar::Bool(v) => IndexLabel::Utf8(v.to_string()),
        Scalar::Null(_) => IndexLabel::Utf8("<null>".to_owned()),
        Scalar::Float64(v) if v.is_nan() => IndexLabel::Utf8("<null>".to_owned()),
        Scalar::Float64(v) => IndexLabel::Utf8(v.to_string()),
    }
}

fn group_generic(keys: &[Scalar], values: &[Scalar], dropna: bool) -> Vec<(Scalar, Accumulator)> {
    let mut ordering = Vec::<(Scalar, Accumulator)>::new();
    let mut slot = HashMap::<GroupKeyRef<'_>, usize>::new();

    for (key, value) in keys.iter().zip(values) {
        if dropna && key.is_missing() {
            continue;
        }

        let position = *slot.entry(GroupKeyRef::from_scalar(key)).or_insert_with(|| {
            ordering.push((key.clone(), Accumulator::default()));
            ordering.len() - 1
        });
        ordering[position].1.add(value);
    }

    ordering
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum GroupKeyRef<'a> {
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
    Null,
}

impl<'a> GroupKeyRef<'a> {
    fn from_scalar(key: &'a Scalar) -> Self {
        match key {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) if v.is_nan() => Self::Null,
            Scalar::Float64(v) => Self::FloatBits(v.to_bits()),
            Scalar::Utf8(v) => Self::Utf8(v.as_str()),
            Scalar::Null(_) => Self::Null,
        }
    }
}

const DENSE_INT_KEY_RANGE_LIMIT: i128 = 65_536;

/// Dense-bucket fast path for `Int64` keys such as hours or weekdays.
///
/// Falls back to the generic map path unless every non-dropped key is `Int64`
/// and the key span is within a bounded range budget.
fn try_group_dense_int64(
    keys: &[Scalar],
    values: &[Scalar],
    dropna: bool,
) -> Option<Vec<(Scalar, Accumulator)>> {
    let mut min_key = i64::MAX;
    let mut max_key = i64::MIN;
    let mut saw_int_key = false;

    for key in keys {
        match key {
            Scalar::Int64(v) => {
                saw_int_key = true;
                min_key = min_key.min(*v);
                max_key = max_key.max(*v);
            }
            Scalar::Null(_) if dropna => continue,
            _ => return None,
        }
    }

    if !saw_int_key {
        return Some(Vec::new());
    }

    let span = i128::from(max_key) - i128::from(min_key) + 1;
    if span <= 0 || span > DENSE_INT_KEY_RANGE_LIMIT {
        return None;
    }

    let bucket_len = usize::try_from(span).ok()?;
    let mut buckets = vec![Accumulator::default(); bucket_len];
    let mut seen = vec![false; bucket_len];
    let mut ordering = Vec::<i64>::new();

    for (key, value) in keys.iter().zip(values) {
        let key = match key {
            Scalar::Int64(v) => *v,
            Scalar::Null(_) if dropna => continue,
            _ => return None,
        };

        let bucket = usize::try_from(i128::from(key) - i128::from(min_key)).ok()?;
        if !seen[bucket] {
            seen[bucket] = true;
            ordering.push(key);
        }
        buckets[bucket].add(value);
    }

    ordering
        .into_iter()
        .map(|key| {
            let bucket = usize::try_from(i128::from(key) - i128::from(min_key)).ok()?;
            Some((Scalar::Int64(key), buckets[bucket]))
        })
        .collect()
}

/// Two-key mean laid out as a dense matrix. Every cell holds a value; cells
/// without underlying rows hold 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotGrid {
    pub row_key: String,
    pub column_key: String,
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    /// `values[row][column]`.
    pub values: Vec<Vec<f64>>,
}

impl PivotGrid {
    #[must_use]
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let r = self.rows.iter().position(|label| label == row)?;
        let c = self.columns.iter().position(|label| label == column)?;
        self.values.get(r)?.get(c).copied()
    }

    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        self.values
            .iter_mut()
            .flatten()
            .for_each(|cell| *cell *= factor);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }
}

/// Mean of `value` per (`row_key`, `column_key`) pair.
///
/// The column axis is exactly `column_labels` (sorted, deduplicated); rows
/// whose column key is not listed are ignored. The row axis holds every row
/// key observed with a valid value, in ascending order. Rows missing any of
/// the three cells are skipped.
pub fn pivot_mean(
    frame: &DataFrame,
    row_key: &str,
    column_key: &str,
    value: &str,
    column_labels: &[String],
) -> Result<PivotGrid, GroupByError> {
    let column_of = |name: &str| {
        frame
            .column(name)
            .ok_or_else(|| GroupByError::MissingColumn(name.to_owned()))
    };
    let row_cells = column_of(row_key)?.values();
    let column_cells = column_of(column_key)?.values();
    let value_cells = column_of(value)?.values();

    let mut columns = column_labels.to_vec();
    columns.sort();
    columns.dedup();
    let column_position = columns
        .iter()
        .enumerate()
        .map(|(position, label)| (label.as_str(), position))
        .collect::<HashMap<_, _>>();

    let mut row_keys = Vec::<&Scalar>::new();
    let mut row_position = HashMap::<GroupKeyRef<'_>, usize>::new();
    let mut cells = HashMap::<(usize, usize), Accumulator>::new();

    for ((row, column), cell) in row_cells.iter().zip(column_cells).zip(value_cells) {
        if row.is_missing() || column.is_missing() || cell.to_f64().is_err() {
            continue;
        }
        let column_label = column.to_string();
        let Some(&c) = column_position.get(column_label.as_str()) else {
            continue;
        };
        let r = *row_position
            .entry(GroupKeyRef::from_scalar(row))
            .or_insert_with(|| {
                row_keys.push(row);
                row_keys.len() - 1
            });
        cells.entry((r, c)).or_default().add(cell);
    }

    let mut row_order = (0..row_keys.len()).collect::<Vec<_>>();
    row_order.sort_by(|a, b| row_keys[*a].sort_cmp(row_keys[*b]));

    let values = row_order
        .iter()
        .map(|&r| {
            (0..columns.len())
                .map(|c| {
                    cells
                        .get(&(r, c))
                        .and_then(|acc| acc.mean())
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    Ok(PivotGrid {
        row_key: row_key.to_owned(),
        column_key: column_key.to_owned(),
        rows: row_order.iter().map(|&r| row_keys[r].to_string()).collect(),
        columns,
        values,
    })
}

/// Missing marker used when building key columns from derived values.
pub(crate) fn missing_key() -> Scalar {
    Scalar::Null(NullKind::Null)
}
