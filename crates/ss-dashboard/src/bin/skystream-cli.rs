#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use ss_dashboard::{DashboardConfig, DashboardParams, Session};
use ss_filter::IntRange;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    month: Option<IntRange>,
    days: Option<BTreeSet<u8>>,
    airline: Option<String>,
    delay: Option<IntRange>,
    cancelled_only: bool,
    diverted_only: bool,
    block_airlines: Option<Vec<String>>,
    origins: Option<Vec<String>>,
    scatter_airlines: Option<Vec<String>>,
    json: bool,
}

impl CliArgs {
    fn apply(self, params: &mut DashboardParams) {
        let filter = &mut params.filter;
        if let Some(month) = self.month {
            filter.month = Some(month);
        }
        if let Some(days) = self.days {
            filter.days = days;
        }
        if let Some(airline) = self.airline {
            filter.airline = Some(airline);
        }
        if let Some(delay) = self.delay {
            filter.delay = Some(delay);
        }
        filter.cancelled_only |= self.cancelled_only;
        filter.diverted_only |= self.diverted_only;

        let charts = &mut params.charts;
        if let Some(airlines) = self.block_airlines {
            charts.block_airlines = airlines;
        }
        if let Some(origins) = self.origins {
            charts.origins = origins;
        }
        if let Some(airlines) = self.scatter_airlines {
            charts.scatter_airlines = airlines;
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("skystream-cli error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let config = match args.config.as_deref() {
        Some(path) => DashboardConfig::from_yaml_path(path).map_err(|error| error.to_string())?,
        None => DashboardConfig::default_paths(),
    };

    let mut session = Session::new(config);
    let table = session.table().map_err(|error| error.to_string())?;
    let mut params =
        DashboardParams::defaults(&table, session.config()).map_err(|error| error.to_string())?;

    let json = args.json;
    args.apply(&mut params);

    let output = session.run(&params).map_err(|error| error.to_string())?;
    if json {
        println!("{}", output.to_json().map_err(|error| error.to_string())?);
    } else {
        println!("{}", output.render_plain());
    }

    tracing::debug!(
        hits = session.cache_stats().hits,
        misses = session.cache_stats().misses,
        "table cache"
    );
    Ok(())
}

fn parse_args() -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str, what: &str| {
            args.next()
                .ok_or_else(|| format!("{flag} requires {what}"))
        };
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value("--config", "a path")?)),
            "--month" => parsed.month = Some(parse_range(&value("--month", "LO:HI")?)?),
            "--days" => parsed.days = Some(parse_days(&value("--days", "a day list")?)?),
            "--airline" => parsed.airline = Some(value("--airline", "an airline")?),
            "--delay" => parsed.delay = Some(parse_range(&value("--delay", "LO:HI")?)?),
            "--cancelled-only" => parsed.cancelled_only = true,
            "--diverted-only" => parsed.diverted_only = true,
            "--block-airlines" => {
                parsed.block_airlines = Some(parse_list(&value("--block-airlines", "a list")?));
            }
            "--origins" => parsed.origins = Some(parse_list(&value("--origins", "a list")?)),
            "--scatter-airlines" => {
                parsed.scatter_airlines =
                    Some(parse_list(&value("--scatter-airlines", "a list")?));
            }
            "--json" => parsed.json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(parsed)
}

fn parse_range(raw: &str) -> Result<IntRange, String> {
    let (low, high) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected LO:HI, got {raw:?}"))?;
    let bound = |text: &str| {
        text.trim()
            .parse::<i64>()
            .map_err(|error| format!("invalid bound {text:?}: {error}"))
    };
    Ok(IntRange::new(bound(low)?, bound(high)?))
}

/// Comma-separated weekdays, 1 = Monday. An empty string selects no day.
fn parse_days(raw: &str) -> Result<BTreeSet<u8>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.parse::<u8>() {
            Ok(day @ 1..=7) => Ok(day),
            _ => Err(format!("invalid weekday {item:?} (expected 1-7)")),
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn print_help() {
    println!(
        "skystream-cli\n\
         Usage:\n\
         \tskystream-cli [--config <path>] [filters] [chart selections] [--json]\n\
         Options:\n\
         \t--config <path>               YAML config (datasets, sample size, preview rows)\n\
         \t--month <LO:HI>               inclusive month range\n\
         \t--days <1,2,...>              weekdays to keep, 1 = Monday (\"\" keeps none)\n\
         \t--airline <code>              airline to show (default: first alphabetically)\n\
         \t--delay <LO:HI>               inclusive departure delay range in minutes\n\
         \t--cancelled-only              keep cancelled flights only\n\
         \t--diverted-only               keep diverted flights only\n\
         \t--block-airlines <A,B,...>    airlines for the time-block chart\n\
         \t--origins <X,Y,...>           origins for the weekday chart (busiest five only)\n\
         \t--scatter-airlines <A,B,...>  airlines for the distance scatter\n\
         \t--json                        print the pass as JSON\n\
         \t-h, --help                    show this help\n\
         Logging: RUST_LOG (default warn)"
    );
}
