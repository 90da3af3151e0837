use serde::{Deserialize, Serialize};
use ss_columnar::Column;
use ss_filter::distinct_labels;
use ss_frame::{DataFrame, Series, columns};
use ss_index::IndexLabel;
use ss_runtime::{NoticeKind, NoticeLog};
use ss_types::Scalar;

use crate::{
    GroupByError, GroupByOptions, PivotGrid, groupby_count, groupby_mean, missing_key, pivot_mean,
};

/// Outcome of one aggregation view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Aggregated<T> {
    /// Required columns are absent; the element is omitted.
    Skipped { missing: Vec<String> },
    /// Input or selection is empty.
    NoData,
    Ready(T),
}

impl<T> Aggregated<T> {
    #[must_use]
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Skipped { .. } | Self::NoData => None,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

fn require<T>(
    frame: &DataFrame,
    subject: &str,
    required: &[&str],
    notices: &mut NoticeLog,
) -> Option<Aggregated<T>> {
    let missing = frame.missing_columns(required);
    if missing.is_empty() {
        return None;
    }
    notices.missing_columns(subject, &missing);
    Some(Aggregated::Skipped { missing })
}

fn no_data<T>(subject: &str, detail: &str, notices: &mut NoticeLog) -> Aggregated<T> {
    notices.push(NoticeKind::EmptyResult, subject, detail);
    Aggregated::NoData
}

fn empty_selection<T>(subject: &str, notices: &mut NoticeLog) -> Aggregated<T> {
    notices.push(
        NoticeKind::InvalidSelection,
        subject,
        "select at least one value",
    );
    Aggregated::NoData
}

fn column<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a Column, GroupByError> {
    frame
        .column(name)
        .ok_or_else(|| GroupByError::MissingColumn(name.to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayMetric {
    pub delayed: usize,
    pub total: usize,
    pub percent: f64,
}

impl DelayMetric {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{:.2}%", self.percent)
    }
}

/// Share of filtered flights departing 15+ minutes late. The denominator is
/// every filtered row.
pub fn delay_percentage(view: &DataFrame, notices: &mut NoticeLog) -> Aggregated<DelayMetric> {
    const SUBJECT: &str = "delay percentage";
    if let Some(skipped) = require(view, SUBJECT, &[columns::DEP_DEL15], notices) {
        return skipped;
    }
    let Some(flags) = view.column(columns::DEP_DEL15) else {
        return Aggregated::NoData;
    };
    if view.is_empty() {
        return no_data(SUBJECT, "no flights match the filters", notices);
    }

    let delayed = flags.values().iter().filter(|v| v.is_flag_set()).count();
    let total = view.height();
    Aggregated::Ready(DelayMetric {
        delayed,
        total,
        percent: delayed as f64 / total as f64 * 100.0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyDelay {
    pub hour: i64,
    pub mean_delay_minutes: f64,
}

/// Mean departure delay per scheduled departure hour, ascending by hour.
pub fn average_delay_by_hour(
    view: &DataFrame,
    notices: &mut NoticeLog,
) -> Result<Aggregated<Vec<HourlyDelay>>, GroupByError> {
    const SUBJECT: &str = "average delay by hour";
    if let Some(skipped) = require(
        view,
        SUBJECT,
        &[columns::CRS_DEP_TIME, columns::DEP_DELAY_MINUTES],
        notices,
    ) {
        return Ok(skipped);
    }
    if view.is_empty() {
        return Ok(no_data(SUBJECT, "no flights match the filters", notices));
    }

    let hours = column(view, columns::CRS_DEP_TIME)?
        .values()
        .iter()
        .map(|hhmm| hhmm.to_i64().map_or_else(|_| missing_key(), |t| Scalar::Int64(t / 100)))
        .collect::<Vec<_>>();
    let keys = Series::new("Hour", view.index().clone(), Column::from_values(hours)?)?;
    let delays = Series::new(
        columns::DEP_DELAY_MINUTES,
        view.index().clone(),
        column(view, columns::DEP_DELAY_MINUTES)?.clone(),
    )?;

    let means = groupby_mean(&keys, &delays, GroupByOptions::default())?;
    let mut points = means
        .index()
        .labels()
        .iter()
        .zip(means.values())
        .filter_map(|(label, mean)| match (label, mean.to_f64()) {
            (IndexLabel::Int64(hour), Ok(mean)) => Some(HourlyDelay {
                hour: *hour,
                mean_delay_minutes: mean,
            }),
            _ => None,
        })
        .collect::<Vec<_>>();
    points.sort_by_key(|point| point.hour);

    if points.is_empty() {
        return Ok(no_data(SUBJECT, "no valid departure delays", notices));
    }
    Ok(Aggregated::Ready(points))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationTotals {
    pub cancelled: u64,
    pub diverted: u64,
}

pub fn cancellation_totals(
    view: &DataFrame,
    notices: &mut NoticeLog,
) -> Aggregated<CancellationTotals> {
    const SUBJECT: &str = "cancelled vs diverted";
    if let Some(skipped) = require(
        view,
        SUBJECT,
        &[columns::CANCELLED, columns::DIVERTED],
        notices,
    ) {
        return skipped;
    }
    if view.is_empty() {
        return no_data(SUBJECT, "no flights match the filters", notices);
    }

    let count_set = |name: &str| {
        view.column(name).map_or(0, |flags| {
            flags.values().iter().filter(|v| v.is_flag_set()).count() as u64
        })
    };
    Aggregated::Ready(CancellationTotals {
        cancelled: count_set(columns::CANCELLED),
        diverted: count_set(columns::DIVERTED),
    })
}

/// Percentage of delayed departures per (time block, airline) over the whole
/// table, restricted to `airlines`.
pub fn delay_rate_by_time_block(
    table: &DataFrame,
    airlines: &[String],
    notices: &mut NoticeLog,
) -> Result<Aggregated<PivotGrid>, GroupByError> {
    const SUBJECT: &str = "delay rate by airline and time block";
    if let Some(skipped) = require(
        table,
        SUBJECT,
        &[columns::DEP_DEL15, columns::DEP_TIME_BLK, columns::AIRLINE],
        notices,
    ) {
        return Ok(skipped);
    }
    if airlines.is_empty() {
        return Ok(empty_selection(SUBJECT, notices));
    }

    let grid = pivot_mean(
        table,
        columns::DEP_TIME_BLK,
        columns::AIRLINE,
        columns::DEP_DEL15,
        airlines,
    )?
    .scaled(100.0);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        rows = grid.rows.len(),
        columns = grid.columns.len(),
        "view.time_block_grid"
    );

    if grid.is_empty() {
        return Ok(no_data(SUBJECT, "no flights for the selected airlines", notices));
    }
    Ok(Aggregated::Ready(grid))
}

/// Mean departure delay per (weekday, origin) over the whole table,
/// restricted to `origins`.
pub fn average_delay_by_origin_day(
    table: &DataFrame,
    origins: &[String],
    notices: &mut NoticeLog,
) -> Result<Aggregated<PivotGrid>, GroupByError> {
    const SUBJECT: &str = "average delay by origin and weekday";
    if let Some(skipped) = require(
        table,
        SUBJECT,
        &[columns::ORIGIN, columns::DAY_OF_WEEK, columns::DEP_DELAY_MINUTES],
        notices,
    ) {
        return Ok(skipped);
    }
    if origins.is_empty() {
        return Ok(empty_selection(SUBJECT, notices));
    }

    let grid = pivot_mean(
        table,
        columns::DAY_OF_WEEK,
        columns::ORIGIN,
        columns::DEP_DELAY_MINUTES,
        origins,
    )?;
    if grid.is_empty() {
        return Ok(no_data(SUBJECT, "no flights from the selected origins", notices));
    }
    Ok(Aggregated::Ready(grid))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub distance: f64,
    pub delay_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirlinePoints {
    pub airline: String,
    pub points: Vec<ScatterPoint>,
}

/// Raw (distance, delay) pairs per selected airline, in selection order.
/// An airline without flights keeps an empty point set.
pub fn distance_vs_delay(
    table: &DataFrame,
    airlines: &[String],
    notices: &mut NoticeLog,
) -> Result<Aggregated<Vec<AirlinePoints>>, GroupByError> {
    const SUBJECT: &str = "distance vs delay";
    if let Some(skipped) = require(
        table,
        SUBJECT,
        &[columns::DISTANCE, columns::DEP_DELAY_MINUTES, columns::AIRLINE],
        notices,
    ) {
        return Ok(skipped);
    }
    if airlines.is_empty() {
        return Ok(empty_selection(SUBJECT, notices));
    }

    let mut series = Vec::<AirlinePoints>::new();
    for airline in airlines {
        if !series.iter().any(|existing| &existing.airline == airline) {
            series.push(AirlinePoints {
                airline: airline.clone(),
                points: Vec::new(),
            });
        }
    }

    let carriers = column(table, columns::AIRLINE)?.values();
    let distances = column(table, columns::DISTANCE)?.values();
    let delays = column(table, columns::DEP_DELAY_MINUTES)?.values();
    for ((carrier, distance), delay) in carriers.iter().zip(distances).zip(delays) {
        let (Ok(distance), Ok(delay_minutes)) = (distance.to_f64(), delay.to_f64()) else {
            continue;
        };
        if carrier.is_missing() {
            continue;
        }
        let carrier = carrier.to_string();
        if let Some(slot) = series.iter_mut().find(|entry| entry.airline == carrier) {
            slot.points.push(ScatterPoint {
                distance,
                delay_minutes,
            });
        }
    }

    if series.iter().all(|entry| entry.points.is_empty()) {
        return Ok(no_data(SUBJECT, "no flights for the selected airlines", notices));
    }
    Ok(Aggregated::Ready(series))
}

/// The `n` busiest origins, by descending flight count then name.
pub fn top_origins(table: &DataFrame, n: usize) -> Result<Vec<String>, GroupByError> {
    let Some(origin) = table.series(columns::ORIGIN) else {
        return Ok(Vec::new());
    };
    let origin = origin?;
    let counts = groupby_count(&origin, &origin, GroupByOptions::default())?;

    let mut ranked = counts
        .index()
        .labels()
        .iter()
        .zip(counts.values())
        .map(|(label, count)| (label.to_string(), count.to_i64().unwrap_or(0)))
        .collect::<Vec<_>>();
    ranked.sort_by(|(a_name, a_count), (b_name, b_count)| {
        b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
    });
    Ok(ranked.into_iter().take(n).map(|(name, _)| name).collect())
}

/// How many entries the chart selectors start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSizes {
    pub block_airlines: usize,
    pub origin_candidates: usize,
    pub origins: usize,
    pub scatter_airlines: usize,
}

impl Default for SelectionSizes {
    fn default() -> Self {
        Self {
            block_airlines: 3,
            origin_candidates: 5,
            origins: 3,
            scatter_airlines: 2,
        }
    }
}

/// Chart-specific multi-selects, independent of the sidebar filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSelections {
    pub block_airlines: Vec<String>,
    pub origins: Vec<String>,
    pub scatter_airlines: Vec<String>,
}

impl ChartSelections {
    pub fn defaults(table: &DataFrame, sizes: SelectionSizes) -> Result<Self, GroupByError> {
        let airlines = table
            .column(columns::AIRLINE)
            .map(distinct_labels)
            .unwrap_or_default();
        let origins = top_origins(table, sizes.origin_candidates)?;

        Ok(Self {
            block_airlines: airlines.iter().take(sizes.block_airlines).cloned().collect(),
            origins: origins.into_iter().take(sizes.origins).collect(),
            scatter_airlines: airlines
                .iter()
                .take(sizes.scatter_airlines)
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use ss_columnar::Column;
    use ss_frame::{DataFrame, columns};
    use ss_index::Index;
    use ss_runtime::{NoticeKind, NoticeLog};
    use ss_types::Scalar;

    use super::{
        Aggregated, ChartSelections, SelectionSizes, average_delay_by_hour,
        average_delay_by_origin_day, cancellation_totals, delay_percentage,
        delay_rate_by_time_block, distance_vs_delay, top_origins,
    };

    fn text(values: &[&str]) -> Column {
        Column::from_text(values.iter().map(|v| (*v).to_owned()).collect())
    }

    fn floats(values: &[f64]) -> Column {
        Column::from_values(values.iter().map(|v| Scalar::Float64(*v)).collect()).expect("floats")
    }

    fn ints(values: &[i64]) -> Column {
        Column::from_values(values.iter().map(|v| Scalar::Int64(*v)).collect()).expect("ints")
    }

    fn frame(cols: Vec<(&str, Column)>) -> DataFrame {
        let height = cols.first().map_or(0, |(_, c)| c.len());
        DataFrame::new(
            Index::range(0, height),
            cols.into_iter()
                .map(|(name, column)| (name.to_owned(), column))
                .collect(),
        )
        .expect("frame")
    }

    fn flights() -> DataFrame {
        frame(vec![
            (columns::AIRLINE, text(&["AA", "DL", "AA", "UA", "DL", "AA"])),
            (columns::ORIGIN, text(&["JFK", "ATL", "JFK", "ORD", "ATL", "LAX"])),
            (columns::DAY_OF_WEEK, ints(&[1, 2, 1, 3, 2, 7])),
            (columns::CRS_DEP_TIME, ints(&[805, 830, 1715, 600, 2359, 5])),
            (
                columns::DEP_TIME_BLK,
                text(&[
                    "0800-0859",
                    "0800-0859",
                    "1700-1759",
                    "0600-0659",
                    "2300-2359",
                    "0001-0559",
                ]),
            ),
            (columns::DEP_DELAY_MINUTES, floats(&[10.0, 20.0, 0.0, 90.0, f64::NAN, 3.0])),
            (columns::DEP_DEL15, floats(&[0.0, 1.0, 0.0, 1.0, f64::NAN, 0.0])),
            (columns::DISTANCE, floats(&[2475.0, 760.0, 2475.0, 733.0, 760.0, f64::NAN])),
            (columns::CANCELLED, floats(&[0.0, 0.0, 1.0, 0.0, 1.0, 0.0])),
            (columns::DIVERTED, floats(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0])),
        ])
    }

    #[test]
    fn single_delayed_row_is_one_hundred_percent() {
        let view = frame(vec![
            (columns::MONTH, ints(&[3])),
            (columns::DAY_OF_WEEK, ints(&[1])),
            (columns::AIRLINE, text(&["AA"])),
            (columns::DEP_DELAY_MINUTES, floats(&[45.0])),
            (columns::DEP_DEL15, floats(&[1.0])),
        ]);
        let mut notices = NoticeLog::new();
        let metric = delay_percentage(&view, &mut notices);
        let ready = metric.ready().expect("metric");
        assert_eq!(ready.delayed, 1);
        assert_eq!(ready.label(), "100.00%");
    }

    #[test]
    fn delay_percentage_uses_every_row_as_denominator() {
        let mut notices = NoticeLog::new();
        let metric = delay_percentage(&flights(), &mut notices);
        let ready = metric.ready().expect("metric");
        assert_eq!((ready.delayed, ready.total), (2, 6));
        assert_eq!(ready.label(), "33.33%");
    }

    #[test]
    fn empty_view_reports_no_data_everywhere() {
        let empty = flights().head(0).expect("head");
        let mut notices = NoticeLog::new();
        assert_eq!(delay_percentage(&empty, &mut notices), Aggregated::NoData);
        assert_eq!(
            average_delay_by_hour(&empty, &mut notices).expect("hourly"),
            Aggregated::NoData
        );
        assert_eq!(cancellation_totals(&empty, &mut notices), Aggregated::NoData);
        assert_eq!(notices.of_kind(NoticeKind::EmptyResult).count(), 3);
    }

    #[test]
    fn hour_groups_share_integer_division_of_departure_time() {
        let view = frame(vec![
            (columns::CRS_DEP_TIME, ints(&[805, 830])),
            (columns::DEP_DELAY_MINUTES, floats(&[10.0, 20.0])),
        ]);
        let mut notices = NoticeLog::new();
        let hourly = average_delay_by_hour(&view, &mut notices).expect("hourly");
        let points = hourly.ready().expect("points");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].hour, 8);
        assert_eq!(points[0].mean_delay_minutes, 15.0);
    }

    #[test]
    fn hourly_series_is_ascending_and_skips_empty_hours() {
        let mut notices = NoticeLog::new();
        let hourly = average_delay_by_hour(&flights(), &mut notices).expect("hourly");
        let hours = hourly
            .ready()
            .expect("points")
            .iter()
            .map(|p| p.hour)
            .collect::<Vec<_>>();
        // 2359 has no valid delay.
        assert_eq!(hours, vec![0, 6, 8, 17]);
    }

    #[test]
    fn missing_columns_skip_the_view() {
        let view = frame(vec![(columns::AIRLINE, text(&["AA"]))]);
        let mut notices = NoticeLog::new();
        assert_eq!(
            delay_percentage(&view, &mut notices),
            Aggregated::Skipped {
                missing: vec![columns::DEP_DEL15.to_owned()]
            }
        );
        let totals = cancellation_totals(&view, &mut notices);
        assert!(matches!(totals, Aggregated::Skipped { ref missing } if missing.len() == 2));
        assert_eq!(notices.of_kind(NoticeKind::MissingColumn).count(), 2);
    }

    #[test]
    fn totals_count_set_flags() {
        let mut notices = NoticeLog::new();
        let totals = cancellation_totals(&flights(), &mut notices);
        let ready = totals.ready().expect("totals");
        assert_eq!((ready.cancelled, ready.diverted), (2, 2));
    }

    #[test]
    fn time_block_grid_is_dense_percentages() {
        let mut notices = NoticeLog::new();
        let selection = vec!["AA".to_owned(), "DL".to_owned()];
        let grid = delay_rate_by_time_block(&flights(), &selection, &mut notices).expect("grid");
        let grid = grid.ready().expect("ready");

        assert_eq!(grid.columns, vec!["AA", "DL"]);
        assert_eq!(grid.rows, vec!["0001-0559", "0800-0859", "1700-1759"]);
        assert_eq!(grid.get("0800-0859", "DL"), Some(100.0));
        assert_eq!(grid.get("0800-0859", "AA"), Some(0.0));
        assert_eq!(grid.get("1700-1759", "DL"), Some(0.0));
        assert!(grid.values.iter().all(|row| row.len() == 2));

        let none = delay_rate_by_time_block(&flights(), &[], &mut notices).expect("empty");
        assert_eq!(none, Aggregated::NoData);
        assert_eq!(notices.of_kind(NoticeKind::InvalidSelection).count(), 1);
    }

    #[test]
    fn origin_day_grid_rows_are_weekdays() {
        let mut notices = NoticeLog::new();
        let origins = vec!["JFK".to_owned(), "ORD".to_owned()];
        let grid = average_delay_by_origin_day(&flights(), &origins, &mut notices).expect("grid");
        let grid = grid.ready().expect("ready");
        assert_eq!(grid.rows, vec!["1", "3"]);
        assert_eq!(grid.get("1", "JFK"), Some(5.0));
        assert_eq!(grid.get("1", "ORD"), Some(0.0));
        assert_eq!(grid.get("3", "ORD"), Some(90.0));
    }

    #[test]
    fn scatter_keeps_selection_order_and_valid_pairs() {
        let mut notices = NoticeLog::new();
        let selection = vec!["DL".to_owned(), "B6".to_owned(), "AA".to_owned()];
        let scatter = distance_vs_delay(&flights(), &selection, &mut notices).expect("scatter");
        let sets = scatter.ready().expect("ready");

        let names = sets.iter().map(|s| s.airline.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["DL", "B6", "AA"]);
        assert_eq!(sets[0].points.len(), 1);
        assert!(sets[1].points.is_empty());
        assert_eq!(sets[2].points.len(), 2);
    }

    #[test]
    fn top_origins_rank_by_frequency_then_name() {
        let table = flights();
        assert_eq!(top_origins(&table, 5).expect("top"), vec!["ATL", "JFK", "LAX", "ORD"]);
        assert_eq!(top_origins(&table, 1).expect("top"), vec!["ATL"]);

        let selections = ChartSelections::defaults(&table, SelectionSizes::default()).expect("defaults");
        assert_eq!(selections.block_airlines, vec!["AA", "DL", "UA"]);
        assert_eq!(selections.origins, vec!["ATL", "JFK", "LAX"]);
        assert_eq!(selections.scatter_airlines, vec!["AA", "DL"]);
    }

    #[test]
    fn aggregated_serializes_with_status_tag() {
        let ready: Aggregated<u64> = Aggregated::Ready(4);
        let json = serde_json::to_string(&ready).expect("json");
        assert_eq!(json, r#"{"status":"ready","data":4}"#);
        let none: Aggregated<u64> = Aggregated::NoData;
        assert_eq!(serde_json::to_string(&none).expect("json"), r#"{"status":"no_data"}"#);
    }
}
