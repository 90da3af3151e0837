#![no_main]

use libfuzzer_sys::fuzz_target;
use ss_filter::{FilterParams, SelectorOptions, apply_filters};
use ss_groupby::{ChartSelections, SelectionSizes, delay_percentage, delay_rate_by_time_block};
use ss_io::read_csv_str;
use ss_runtime::NoticeLog;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(table) = read_csv_str(text) else {
        return;
    };

    let mut params = FilterParams::defaults(&SelectorOptions::from_table(&table));
    if let Some(first) = text.bytes().next() {
        params.days.retain(|day| first & (1 << (day - 1)) != 0);
        params.cancelled_only = first & 0x80 != 0;
    }

    let mut notices = NoticeLog::new();
    let Ok(view) = apply_filters(&table, &params, &mut notices) else {
        return;
    };
    assert!(view.frame().index().is_subset_of(table.index()));

    let metric = delay_percentage(view.frame(), &mut notices);
    if let Some(metric) = metric.ready() {
        assert!((0.0..=100.0).contains(&metric.percent));
    }

    if let Ok(selections) = ChartSelections::defaults(&table, SelectionSizes::default()) {
        if let Ok(grid) = delay_rate_by_time_block(&table, &selections.block_airlines, &mut notices) {
            if let Some(grid) = grid.ready() {
                assert_eq!(grid.values.len(), grid.rows.len());
                assert!(grid.values.iter().all(|row| row.len() == grid.columns.len()));
            }
        }
    }
});
