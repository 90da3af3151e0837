#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ss_columnar::{Column, ComparisonOp};
use ss_frame::{DataFrame, FrameError, columns};
use ss_runtime::{NoticeKind, NoticeLog};
use ss_types::Scalar;
use thiserror::Error;

/// Day-of-week names, 1 = Monday.
pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[must_use]
pub fn weekday_name(day: u8) -> Option<&'static str> {
    day.checked_sub(1)
        .and_then(|offset| WEEKDAYS.get(usize::from(offset)))
        .copied()
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Inclusive integer bounds as chosen on a range slider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntRange {
    pub low: i64,
    pub high: i64,
}

impl IntRange {
    #[must_use]
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }
}

/// A single row test against one column. Missing cells never pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Range {
        column: String,
        low: Scalar,
        high: Scalar,
    },
    InSet {
        column: String,
        members: Vec<Scalar>,
    },
    Equals {
        column: String,
        value: Scalar,
    },
    FlagSet {
        column: String,
    },
}

impl Predicate {
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Range { column, .. }
            | Self::InSet { column, .. }
            | Self::Equals { column, .. }
            | Self::FlagSet { column } => column,
        }
    }

    /// Row mask over `frame`, or `None` when the column is absent.
    #[must_use]
    pub fn mask(&self, frame: &DataFrame) -> Option<Vec<bool>> {
        frame.column(self.column()).map(|column| self.evaluate(column))
    }

    #[must_use]
    pub fn evaluate(&self, column: &Column) -> Vec<bool> {
        match self {
            Self::Range { low, high, .. } => column
                .compare_scalar(ComparisonOp::Ge, low)
                .into_iter()
                .zip(column.compare_scalar(ComparisonOp::Le, high))
                .map(|(above, below)| above && below)
                .collect(),
            Self::InSet { members, .. } => column.is_in(members),
            Self::Equals { value, .. } => column.compare_scalar(ComparisonOp::Eq, value),
            Self::FlagSet { .. } => column.values().iter().map(Scalar::is_flag_set).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Month,
    DayOfWeek,
    Airline,
    DepartureDelay,
    CancelledOnly,
    DivertedOnly,
}

impl StageKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::DayOfWeek => "day of week",
            Self::Airline => "airline",
            Self::DepartureDelay => "departure delay",
            Self::CancelledOnly => "cancelled only",
            Self::DivertedOnly => "diverted only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStage {
    pub kind: StageKind,
    pub predicate: Predicate,
    /// A mandatory stage empties the view when its column is absent instead
    /// of being skipped.
    pub mandatory: bool,
}

/// Sidebar state. `None` ranges leave the corresponding stage out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    pub month: Option<IntRange>,
    pub days: BTreeSet<u8>,
    pub airline: Option<String>,
    pub delay: Option<IntRange>,
    pub cancelled_only: bool,
    pub diverted_only: bool,
}

impl FilterParams {
    /// Initial state: full ranges, every weekday, the first airline and both
    /// toggles off.
    #[must_use]
    pub fn defaults(options: &SelectorOptions) -> Self {
        Self {
            month: options.months,
            days: (1..=7).collect(),
            airline: options.airlines.first().cloned(),
            delay: options.delay,
            cancelled_only: false,
            diverted_only: false,
        }
    }
}

/// Candidate values for the sidebar selectors. Always drawn from the
/// unfiltered table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorOptions {
    pub months: Option<IntRange>,
    pub delay: Option<IntRange>,
    pub airlines: Vec<String>,
}

impl SelectorOptions {
    #[must_use]
    pub fn from_table(table: &DataFrame) -> Self {
        Self {
            months: table.column(columns::MONTH).and_then(truncated_bounds),
            delay: table
                .column(columns::DEP_DELAY_MINUTES)
                .and_then(truncated_bounds),
            airlines: table
                .column(columns::AIRLINE)
                .map(distinct_labels)
                .unwrap_or_default(),
        }
    }
}

fn truncated_bounds(column: &Column) -> Option<IntRange> {
    column
        .numeric_bounds()
        .map(|(low, high)| IntRange::new(low.trunc() as i64, high.trunc() as i64))
}

/// Sorted distinct non-missing values of `column`, rendered as text.
#[must_use]
pub fn distinct_labels(column: &Column) -> Vec<String> {
    column
        .values()
        .iter()
        .filter(|value| !value.is_missing())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub kind: StageKind,
    pub applied: bool,
    pub rows_out: usize,
}

/// Rows of the loaded table that pass every active stage, with their
/// original row labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredView {
    frame: DataFrame,
    stages: Vec<StageReport>,
}

impl FilteredView {
    #[must_use]
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    #[must_use]
    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    #[must_use]
    pub fn stages(&self) -> &[StageReport] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frame.height()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPipeline {
    stages: Vec<FilterStage>,
}

impl FilterPipeline {
    #[must_use]
    pub fn from_params(params: &FilterParams) -> Self {
        let mut stages = Vec::with_capacity(6);

        if let Some(range) = params.month {
            stages.push(FilterStage {
                kind: StageKind::Month,
                predicate: int_range(columns::MONTH, range),
                mandatory: false,
            });
        }

        stages.push(FilterStage {
            kind: StageKind::DayOfWeek,
            predicate: Predicate::InSet {
                column: columns::DAY_OF_WEEK.to_owned(),
                members: params
                    .days
                    .iter()
                    .map(|day| Scalar::Int64(i64::from(*day)))
                    .collect(),
            },
            mandatory: false,
        });

        // No selection is represented as an empty candidate set so the stage
        // still runs and reports the invalid selection.
        stages.push(FilterStage {
            kind: StageKind::Airline,
            predicate: match &params.airline {
                Some(airline) => Predicate::Equals {
                    column: columns::AIRLINE.to_owned(),
                    value: Scalar::Utf8(airline.clone()),
                },
                None => Predicate::InSet {
                    column: columns::AIRLINE.to_owned(),
                    members: Vec::new(),
                },
            },
            mandatory: true,
        });

        if let Some(range) = params.delay {
            stages.push(FilterStage {
                kind: StageKind::DepartureDelay,
                predicate: int_range(columns::DEP_DELAY_MINUTES, range),
                mandatory: false,
            });
        }

        if params.cancelled_only {
            stages.push(FilterStage {
                kind: StageKind::CancelledOnly,
                predicate: Predicate::FlagSet {
                    column: columns::CANCELLED.to_owned(),
                },
                mandatory: false,
            });
        }
        if params.diverted_only {
            stages.push(FilterStage {
                kind: StageKind::DivertedOnly,
                predicate: Predicate::FlagSet {
                    column: columns::DIVERTED.to_owned(),
                },
                mandatory: false,
            });
        }

        Self { stages }
    }

    #[must_use]
    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Narrow `table` by every stage. Stages are AND-composed over the full
    /// table, so their order does not affect the result.
    pub fn apply(
        &self,
        table: &DataFrame,
        notices: &mut NoticeLog,
    ) -> Result<FilteredView, FilterError> {
        let mut keep = vec![true; table.height()];
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let subject = format!("{} filter", stage.kind.label());
            let applied = match stage.predicate.mask(table) {
                Some(mask) => {
                    if stage.mandatory && !table.is_empty() && !mask.iter().any(|hit| *hit) {
                        notices.push(
                            NoticeKind::InvalidSelection,
                            subject.as_str(),
                            "selection is not among the available values",
                        );
                    }
                    keep.iter_mut()
                        .zip(mask)
                        .for_each(|(slot, hit)| *slot &= hit);
                    true
                }
                None => {
                    notices.missing_columns(
                        subject.as_str(),
                        &[stage.predicate.column().to_owned()],
                    );
                    if stage.mandatory {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            stage = stage.kind.label(),
                            column = stage.predicate.column(),
                            "mandatory filter column absent; view is empty"
                        );
                        keep.fill(false);
                    }
                    false
                }
            };

            let rows_out = keep.iter().filter(|hit| **hit).count();
            #[cfg(feature = "tracing")]
            tracing::debug!(stage = stage.kind.label(), applied, rows_out, "filter.stage");
            reports.push(StageReport {
                kind: stage.kind,
                applied,
                rows_out,
            });
        }

        let frame = table.filter_rows(&keep)?;
        if frame.is_empty() {
            notices.push(
                NoticeKind::EmptyResult,
                "filtered view",
                "no rows match the current filters",
            );
        }

        Ok(FilteredView {
            frame,
            stages: reports,
        })
    }
}

fn int_range(column: &str, range: IntRange) -> Predicate {
    Predicate::Range {
        column: column.to_owned(),
        low: Scalar::Int64(range.low),
        high: Scalar::Int64(range.high),
    }
}

/// Build the pipeline for `params` and run it.
pub fn apply_filters(
    table: &DataFrame,
    params: &FilterParams,
    notices: &mut NoticeLog,
) -> Result<FilteredView, FilterError> {
    FilterPipeline::from_params(params).apply(table, notices)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use ss_columnar::Column;
    use ss_frame::{DataFrame, columns};
    use ss_index::Index;
    use ss_runtime::{NoticeKind, NoticeLog};
    use ss_types::{NullKind, Scalar};

    use super::{
        FilterParams, FilterPipeline, IntRange, Predicate, SelectorOptions, StageKind,
        apply_filters, weekday_name,
    };

    struct Row {
        month: i64,
        day: i64,
        airline: &'static str,
        delay: f64,
        cancelled: bool,
        diverted: bool,
    }

    fn row(month: i64, day: i64, airline: &'static str, delay: f64) -> Row {
        Row {
            month,
            day,
            airline,
            delay,
            cancelled: false,
            diverted: false,
        }
    }

    fn table(rows: &[Row]) -> DataFrame {
        let int = |f: fn(&Row) -> i64| {
            Column::from_values(rows.iter().map(|r| Scalar::Int64(f(r))).collect()).expect("int")
        };
        let flag = |f: fn(&Row) -> bool| {
            Column::from_values(rows.iter().map(|r| Scalar::Bool(f(r))).collect()).expect("flag")
        };
        DataFrame::new(
            Index::range(0, rows.len()),
            vec![
                (columns::MONTH.to_owned(), int(|r| r.month)),
                (columns::DAY_OF_WEEK.to_owned(), int(|r| r.day)),
                (
                    columns::AIRLINE.to_owned(),
                    Column::from_text(rows.iter().map(|r| r.airline.to_owned()).collect()),
                ),
                (
                    columns::DEP_DELAY_MINUTES.to_owned(),
                    Column::from_values(rows.iter().map(|r| Scalar::Float64(r.delay)).collect())
                        .expect("delay"),
                ),
                (columns::CANCELLED.to_owned(), flag(|r| r.cancelled)),
                (columns::DIVERTED.to_owned(), flag(|r| r.diverted)),
            ],
        )
        .expect("table")
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            row(1, 1, "AA", 0.0),
            row(3, 1, "AA", 45.0),
            row(3, 2, "AA", 5.0),
            row(3, 1, "DL", 12.0),
            row(7, 5, "UA", 120.0),
            Row {
                cancelled: true,
                ..row(3, 1, "DL", 0.0)
            },
            Row {
                cancelled: true,
                diverted: true,
                ..row(4, 6, "DL", 30.0)
            },
            Row {
                diverted: true,
                ..row(4, 6, "DL", 15.0)
            },
        ]
    }

    #[test]
    fn selector_options_and_defaults_cover_whole_table() {
        let df = table(&sample_rows());
        let options = SelectorOptions::from_table(&df);
        assert_eq!(options.months, Some(IntRange::new(1, 7)));
        assert_eq!(options.delay, Some(IntRange::new(0, 120)));
        assert_eq!(options.airlines, vec!["AA", "DL", "UA"]);

        let params = FilterParams::defaults(&options);
        assert_eq!(params.airline.as_deref(), Some("AA"));
        assert_eq!(params.days.len(), 7);
        assert!(!params.cancelled_only && !params.diverted_only);

        let mut notices = NoticeLog::new();
        let view = apply_filters(&df, &params, &mut notices).expect("filter");
        assert_eq!(view.len(), 3);
        assert!(notices.is_empty());
    }

    #[test]
    fn narrow_month_day_airline_leaves_single_row() {
        let df = table(&sample_rows());
        let params = FilterParams {
            month: Some(IntRange::new(3, 3)),
            days: BTreeSet::from([1]),
            airline: Some("AA".to_owned()),
            delay: None,
            cancelled_only: false,
            diverted_only: false,
        };

        let mut notices = NoticeLog::new();
        let view = apply_filters(&df, &params, &mut notices).expect("filter");
        assert_eq!(view.len(), 1);
        assert_eq!(view.frame().index().labels(), &[1_i64.into()]);
        assert_eq!(
            view.frame().column(columns::DEP_DELAY_MINUTES).expect("delay").values(),
            &[Scalar::Float64(45.0)]
        );
        let counts = view.stages().iter().map(|s| s.rows_out).collect::<Vec<_>>();
        assert_eq!(counts, vec![4, 3, 1]);
    }

    #[test]
    fn empty_weekday_set_yields_empty_view() {
        let df = table(&sample_rows());
        let mut params = FilterParams::defaults(&SelectorOptions::from_table(&df));
        params.airline = Some("DL".to_owned());
        params.days.clear();

        let mut notices = NoticeLog::new();
        let view = apply_filters(&df, &params, &mut notices).expect("filter");
        assert!(view.is_empty());
        assert_eq!(notices.of_kind(NoticeKind::EmptyResult).count(), 1);
    }

    #[test]
    fn both_toggles_keep_the_intersection() {
        let df = table(&sample_rows());
        let mut params = FilterParams::defaults(&SelectorOptions::from_table(&df));
        params.airline = Some("DL".to_owned());

        params.cancelled_only = true;
        let mut notices = NoticeLog::new();
        assert_eq!(apply_filters(&df, &params, &mut notices).expect("c").len(), 2);

        params.diverted_only = true;
        let view = apply_filters(&df, &params, &mut notices).expect("c+d");
        assert_eq!(view.frame().index().labels(), &[6_i64.into()]);
    }

    #[test]
    fn absent_optional_column_is_skipped_with_notice() {
        let df = table(&sample_rows());
        let trimmed = DataFrame::new(
            df.index().clone(),
            [columns::MONTH, columns::AIRLINE]
                .iter()
                .map(|name| ((*name).to_owned(), df.column(name).expect("col").clone()))
                .collect(),
        )
        .expect("trimmed");

        let mut params = FilterParams::defaults(&SelectorOptions::from_table(&df));
        params.airline = Some("DL".to_owned());
        params.cancelled_only = true;

        let mut notices = NoticeLog::new();
        let view = apply_filters(&trimmed, &params, &mut notices).expect("filter");
        assert_eq!(view.len(), 4);
        let skipped = view
            .stages()
            .iter()
            .filter(|s| !s.applied)
            .map(|s| s.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            skipped,
            vec![
                StageKind::DayOfWeek,
                StageKind::DepartureDelay,
                StageKind::CancelledOnly
            ]
        );
        assert_eq!(notices.of_kind(NoticeKind::MissingColumn).count(), 3);
    }

    #[test]
    fn absent_airline_column_empties_the_view() {
        let df = table(&sample_rows());
        let no_airline = DataFrame::new(
            df.index().clone(),
            vec![(
                columns::MONTH.to_owned(),
                df.column(columns::MONTH).expect("month").clone(),
            )],
        )
        .expect("frame");

        let options = SelectorOptions::from_table(&no_airline);
        assert!(options.airlines.is_empty());
        let params = FilterParams::defaults(&options);

        let mut notices = NoticeLog::new();
        let view = apply_filters(&no_airline, &params, &mut notices).expect("filter");
        assert!(view.is_empty());
        assert!(notices.of_kind(NoticeKind::MissingColumn).count() >= 1);
    }

    #[test]
    fn unknown_or_missing_airline_is_an_invalid_selection() {
        let df = table(&sample_rows());
        let mut params = FilterParams::defaults(&SelectorOptions::from_table(&df));

        for airline in [Some("ZZ".to_owned()), None] {
            params.airline = airline;
            let mut notices = NoticeLog::new();
            let view = apply_filters(&df, &params, &mut notices).expect("filter");
            assert!(view.is_empty());
            assert_eq!(notices.of_kind(NoticeKind::InvalidSelection).count(), 1);
        }
    }

    #[test]
    fn missing_cells_never_satisfy_predicates() {
        let column = Column::from_values(vec![
            Scalar::Float64(10.0),
            Scalar::Null(NullKind::NaN),
            Scalar::Null(NullKind::Null),
        ])
        .expect("column");

        let range = Predicate::Range {
            column: "x".to_owned(),
            low: Scalar::Int64(i64::MIN),
            high: Scalar::Int64(i64::MAX),
        };
        assert_eq!(range.evaluate(&column), vec![true, false, false]);

        let flag = Predicate::FlagSet {
            column: "x".to_owned(),
        };
        let flags = Column::from_values(vec![
            Scalar::Float64(1.0),
            Scalar::Float64(0.0),
            Scalar::Null(NullKind::NaN),
        ])
        .expect("flags");
        assert_eq!(flag.evaluate(&flags), vec![true, false, false]);
    }

    #[test]
    fn pipeline_serializes_stage_list() {
        let df = table(&sample_rows());
        let params = FilterParams::defaults(&SelectorOptions::from_table(&df));
        let pipeline = FilterPipeline::from_params(&params);
        let json = serde_json::to_string(&pipeline).expect("json");
        assert!(json.contains("\"kind\":\"day_of_week\""));
        assert!(json.contains("\"mandatory\":true"));
    }

    #[test]
    fn weekday_names_start_on_monday() {
        assert_eq!(weekday_name(1), Some("Monday"));
        assert_eq!(weekday_name(7), Some("Sunday"));
        assert_eq!(weekday_name(0), None);
        assert_eq!(weekday_name(8), None);
    }
}
