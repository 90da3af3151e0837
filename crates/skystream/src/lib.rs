#![forbid(unsafe_code)]

//! Flight-delay analytics over two sampled on-time datasets.
//!
//! A session loads both datasets once ([`Session::table`]), then every change
//! of [`DashboardParams`] runs one pure pass ([`compute_dashboard`]) producing
//! the preview, the delay metric and five chart series.
//!
//! ```no_run
//! use skystream::{DashboardConfig, DashboardParams, Session};
//!
//! let mut session = Session::new(DashboardConfig::default_paths());
//! let table = session.table()?;
//! let params = DashboardParams::defaults(&table, session.config())?;
//! println!("{}", session.run(&params)?.render_plain());
//! # Ok::<(), skystream::DashboardError>(())
//! ```

pub use ss_columnar::{Column, ColumnError, ComparisonOp};
pub use ss_dashboard::{
    DEFAULT_PREVIEW_ROWS, DashboardConfig, DashboardError, DashboardOutput, DashboardParams,
    PreviewTable, Session, compute_dashboard,
};
pub use ss_filter::{
    FilterError, FilterParams, FilterPipeline, FilterStage, FilteredView, IntRange, Predicate,
    SelectorOptions, StageKind, StageReport, WEEKDAYS, apply_filters, distinct_labels,
    weekday_name,
};
pub use ss_frame::{DataFrame, FrameError, Series, columns};
pub use ss_groupby::{
    Aggregated, AirlinePoints, CancellationTotals, ChartSelections, DelayMetric, GroupByError,
    GroupByOptions, HourlyDelay, PivotGrid, ScatterPoint, SelectionSizes, average_delay_by_hour,
    average_delay_by_origin_day, cancellation_totals, delay_percentage, delay_rate_by_time_block,
    distance_vs_delay, groupby_count, groupby_mean, groupby_sum, pivot_mean, top_origins,
};
pub use ss_index::{Index, IndexError, IndexLabel};
pub use ss_io::{
    BernoulliSampler, DEFAULT_TARGET_SAMPLE_SIZE, DatasetSource, FlightTable, IoError,
    LoaderConfig, SampledFrame, SamplingPlan, SamplingStrategy, SourceSummary,
    load_flight_table, load_flight_table_with_rng, read_csv_str, read_sampled_csv,
};
pub use ss_runtime::{
    CacheStats, InputIdentity, MemoCache, Notice, NoticeKind, NoticeLog, RuntimeError,
};
pub use ss_types::{DType, NullKind, Scalar, TypeError};
