#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ss_filter::{
    FilterError, FilterParams, SelectorOptions, StageReport, apply_filters, weekday_name,
};
use ss_frame::{DataFrame, FrameError, columns};
use ss_groupby::{
    Aggregated, AirlinePoints, CancellationTotals, ChartSelections, DelayMetric, GroupByError,
    HourlyDelay, PivotGrid, SelectionSizes, average_delay_by_hour, average_delay_by_origin_day,
    cancellation_totals, delay_percentage, delay_rate_by_time_block, distance_vs_delay,
    top_origins,
};
use ss_io::{FlightTable, IoError, LoaderConfig, load_flight_table};
use ss_runtime::{CacheStats, MemoCache, NoticeKind, NoticeLog};
use thiserror::Error;

pub const DEFAULT_PREVIEW_ROWS: usize = 20;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Load(#[from] IoError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub loader: LoaderConfig,
    pub preview_rows: usize,
    pub charts: SelectionSizes,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            charts: SelectionSizes::default(),
        }
    }
}

impl DashboardConfig {
    /// Default datasets, resolved against the working directory.
    #[must_use]
    pub fn default_paths() -> Self {
        Self::default()
    }

    /// Read a YAML config. Relative dataset paths are taken relative to the
    /// config file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, DashboardError> {
        let config: Self = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            loader: config.loader.clone().resolved_against(base),
            ..config
        })
    }
}

/// Everything the user can change between two passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardParams {
    pub filter: FilterParams,
    pub charts: ChartSelections,
}

impl DashboardParams {
    pub fn defaults(table: &FlightTable, config: &DashboardConfig) -> Result<Self, DashboardError> {
        let frame = table.frame();
        Ok(Self {
            filter: FilterParams::defaults(&SelectorOptions::from_table(frame)),
            charts: ChartSelections::defaults(frame, config.charts)?,
        })
    }
}

/// First rows of the filtered view, rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewTable {
    pub columns: Vec<String>,
    pub row_ids: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

impl PreviewTable {
    pub fn from_frame(frame: &DataFrame, limit: usize) -> Result<Self, FrameError> {
        let head = frame.head(limit)?;
        let rows = (0..head.height())
            .map(|row| {
                head.column_names()
                    .iter()
                    .map(|name| {
                        head.column(name)
                            .and_then(|column| column.value(row))
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            columns: head.column_names().to_vec(),
            row_ids: head.index().labels().iter().map(ToString::to_string).collect(),
            rows,
            total_rows: frame.height(),
        })
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = format!(
            "showing {} of {} rows\n",
            self.rows.len(),
            self.total_rows
        );
        let _ = writeln!(out, "row\t{}", self.columns.join("\t"));
        for (id, row) in self.row_ids.iter().zip(&self.rows) {
            let _ = writeln!(out, "{id}\t{}", row.join("\t"));
        }
        out
    }
}

/// Result of one full pass. Every chart slot is present; unavailable ones
/// say why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardOutput {
    pub table_rows: usize,
    pub filtered_rows: usize,
    pub filter_stages: Vec<StageReport>,
    pub preview: PreviewTable,
    pub delay_metric: Aggregated<DelayMetric>,
    pub hourly_delay: Aggregated<Vec<HourlyDelay>>,
    pub cancellations: Aggregated<CancellationTotals>,
    pub delay_rate_by_time_block: Aggregated<PivotGrid>,
    pub delay_by_origin_day: Aggregated<PivotGrid>,
    pub distance_vs_delay: Aggregated<Vec<AirlinePoints>>,
    pub notices: NoticeLog,
}

/// Filter, aggregate and package one pass. Sidebar-driven views read the
/// filtered rows; the grids and the scatter read the whole table.
pub fn compute_dashboard(
    table: &FlightTable,
    params: &DashboardParams,
    config: &DashboardConfig,
) -> Result<DashboardOutput, DashboardError> {
    let frame = table.frame();
    let mut notices = NoticeLog::new();

    let view = apply_filters(frame, &params.filter, &mut notices)?;
    let filtered = view.frame();

    let origins = if frame.has_column(columns::ORIGIN) {
        let candidates = top_origins(frame, config.charts.origin_candidates)?;
        let (kept, dropped): (Vec<_>, Vec<_>) = params
            .charts
            .origins
            .iter()
            .cloned()
            .partition(|origin| candidates.contains(origin));
        if !dropped.is_empty() {
            notices.push(
                NoticeKind::InvalidSelection,
                "average delay by origin and weekday",
                format!(
                    "not among the {} busiest origins: {}",
                    config.charts.origin_candidates,
                    dropped.join(", ")
                ),
            );
        }
        kept
    } else {
        params.charts.origins.clone()
    };

    let output = DashboardOutput {
        table_rows: frame.height(),
        filtered_rows: view.len(),
        filter_stages: view.stages().to_vec(),
        preview: PreviewTable::from_frame(filtered, config.preview_rows)?,
        delay_metric: delay_percentage(filtered, &mut notices),
        hourly_delay: average_delay_by_hour(filtered, &mut notices)?,
        cancellations: cancellation_totals(filtered, &mut notices),
        delay_rate_by_time_block: delay_rate_by_time_block(
            frame,
            &params.charts.block_airlines,
            &mut notices,
        )?,
        delay_by_origin_day: average_delay_by_origin_day(frame, &origins, &mut notices)?,
        distance_vs_delay: distance_vs_delay(frame, &params.charts.scatter_airlines, &mut notices)?,
        notices,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        table_rows = output.table_rows,
        filtered_rows = output.filtered_rows,
        notices = output.notices.records().len(),
        "dashboard pass"
    );

    Ok(output)
}

fn status<T>(value: &Aggregated<T>) -> Option<String> {
    match value {
        Aggregated::Ready(_) => None,
        Aggregated::NoData => Some("no data".to_owned()),
        Aggregated::Skipped { missing } => Some(format!("skipped (missing {})", missing.join(", "))),
    }
}

fn render_grid(out: &mut String, title: &str, grid: &Aggregated<PivotGrid>, unit: &str) {
    let Aggregated::Ready(grid) = grid else {
        let _ = writeln!(out, "{title}: {}", status(grid).unwrap_or_default());
        return;
    };

    let _ = writeln!(out, "{title} ({unit}):");
    let _ = writeln!(out, "  {}\t{}", grid.row_key, grid.columns.join("\t"));
    for (label, row) in grid.rows.iter().zip(&grid.values) {
        let label = match label.parse::<u8>() {
            Ok(day) if grid.row_key == columns::DAY_OF_WEEK => {
                weekday_name(day).map_or_else(|| label.clone(), str::to_owned)
            }
            _ => label.clone(),
        };
        let cells = row
            .iter()
            .map(|value| format!("{value:.2}"))
            .collect::<Vec<_>>();
        let _ = writeln!(out, "  {label}\t{}", cells.join("\t"));
    }
}

impl DashboardOutput {
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "flights: {} sampled, {} after filters",
            self.table_rows, self.filtered_rows
        );
        out.push_str(&self.preview.render_plain());

        let metric = match &self.delay_metric {
            Aggregated::Ready(metric) => metric.label(),
            other => status(other).unwrap_or_default(),
        };
        let _ = writeln!(out, "delayed departures (15+ min): {metric}");

        match &self.hourly_delay {
            Aggregated::Ready(points) => {
                let _ = writeln!(out, "average delay by hour (minutes):");
                for point in points {
                    let _ = writeln!(out, "  {:02}h\t{:.2}", point.hour, point.mean_delay_minutes);
                }
            }
            other => {
                let _ = writeln!(
                    out,
                    "average delay by hour: {}",
                    status(other).unwrap_or_default()
                );
            }
        }

        match &self.cancellations {
            Aggregated::Ready(totals) => {
                let _ = writeln!(
                    out,
                    "cancelled: {}\tdiverted: {}",
                    totals.cancelled, totals.diverted
                );
            }
            other => {
                let _ = writeln!(
                    out,
                    "cancelled vs diverted: {}",
                    status(other).unwrap_or_default()
                );
            }
        }

        render_grid(
            &mut out,
            "delay rate by airline and time block",
            &self.delay_rate_by_time_block,
            "% delayed",
        );
        render_grid(
            &mut out,
            "average delay by origin and weekday",
            &self.delay_by_origin_day,
            "minutes",
        );

        match &self.distance_vs_delay {
            Aggregated::Ready(sets) => {
                let _ = writeln!(out, "distance vs delay:");
                for set in sets {
                    let _ = writeln!(out, "  {}\t{} points", set.airline, set.points.len());
                }
            }
            other => {
                let _ = writeln!(out, "distance vs delay: {}", status(other).unwrap_or_default());
            }
        }

        if !self.notices.is_empty() {
            let _ = writeln!(out, "notices:");
            for notice in self.notices.records() {
                let _ = writeln!(out, "  {}", notice.render_plain());
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String, DashboardError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One user's dashboard. Loads the flight table at most once per input
/// identity and hands it out shared.
#[derive(Debug)]
pub struct Session {
    config: DashboardConfig,
    cache: MemoCache<FlightTable>,
}

impl Session {
    #[must_use]
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            config,
            cache: MemoCache::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// The loaded table. A missing or malformed dataset is fatal.
    pub fn table(&mut self) -> Result<Arc<FlightTable>, DashboardError> {
        let identity = self.config.loader.identity()?;
        let loader = &self.config.loader;
        let table = self
            .cache
            .get_or_try_insert_with(identity, || load_flight_table(loader))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            hits = self.cache.stats().hits,
            misses = self.cache.stats().misses,
            rows = table.height(),
            "session.table"
        );

        Ok(table)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Load (or reuse) the table and run one pass.
    pub fn run(&mut self, params: &DashboardParams) -> Result<DashboardOutput, DashboardError> {
        let table = self.table()?;
        compute_dashboard(&table, params, &self.config)
    }
}
