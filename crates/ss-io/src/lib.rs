#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use csv::{ReaderBuilder, StringRecord};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use ss_columnar::{Column, ColumnError};
use ss_frame::{DataFrame, FrameError};
use ss_index::Index;
use ss_runtime::InputIdentity;
use ss_types::Scalar;
use thiserror::Error;

pub const DEFAULT_TARGET_SAMPLE_SIZE: usize = 20_000;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("data unavailable at {}: {reason}", path.display())]
    DataUnavailable { path: PathBuf, reason: String },
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl IoError {
    fn unavailable(path: &Path, reason: impl ToString) -> Self {
        Self::DataUnavailable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Independent per-row inclusion with `p = target / estimated_total`.
    /// The realized size is random and drifts with a stale estimate.
    #[default]
    Bernoulli,
    /// Exactly `min(target, rows)` rows (Algorithm R), in file order.
    Reservoir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingPlan {
    pub target_sample_size: usize,
    pub estimated_total_rows: usize,
}

impl SamplingPlan {
    /// Per-row inclusion probability, clamped to `[0, 1]`. A zero estimate
    /// keeps every row.
    #[must_use]
    pub fn probability(&self) -> f64 {
        if self.estimated_total_rows == 0 {
            return 1.0;
        }
        (self.target_sample_size as f64 / self.estimated_total_rows as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BernoulliSampler {
    probability: f64,
}

impl BernoulliSampler {
    #[must_use]
    pub fn new(plan: SamplingPlan) -> Self {
        Self {
            probability: plan.probability(),
        }
    }

    /// Fresh trial for one data row.
    pub fn admit<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random::<f64>() < self.probability
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSource {
    pub label: String,
    pub path: PathBuf,
    pub estimated_total_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub datasets: [DatasetSource; 2],
    pub target_sample_size: usize,
    pub strategy: SamplingStrategy,
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            datasets: [
                DatasetSource {
                    label: "2021".to_owned(),
                    path: PathBuf::from("Combined_Flights_2021.csv"),
                    estimated_total_rows: 2_500_000,
                },
                DatasetSource {
                    label: "2022".to_owned(),
                    path: PathBuf::from("Combined_Flights_2022.csv"),
                    estimated_total_rows: 1_800_000,
                },
            ],
            target_sample_size: DEFAULT_TARGET_SAMPLE_SIZE,
            strategy: SamplingStrategy::Bernoulli,
            seed: None,
        }
    }
}

impl LoaderConfig {
    #[must_use]
    pub fn plan_for(&self, source: &DatasetSource) -> SamplingPlan {
        SamplingPlan {
            target_sample_size: self.target_sample_size,
            estimated_total_rows: source.estimated_total_rows,
        }
    }

    /// Resolve a relative dataset path against `base`.
    #[must_use]
    pub fn resolved_against(mut self, base: &Path) -> Self {
        for source in &mut self.datasets {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
        self
    }

    /// Fingerprint of the files on disk plus the sampling parameters. Two
    /// loads with equal identities are interchangeable.
    pub fn identity(&self) -> Result<InputIdentity, IoError> {
        let mut parts = Vec::<String>::new();
        for source in &self.datasets {
            let canonical =
                fs::canonicalize(&source.path).map_err(|err| IoError::unavailable(&source.path, err))?;
            let metadata =
                fs::metadata(&canonical).map_err(|err| IoError::unavailable(&source.path, err))?;
            let modified_ns = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |elapsed| elapsed.as_nanos());

            parts.push(canonical.display().to_string());
            parts.push(metadata.len().to_string());
            parts.push(modified_ns.to_string());
            parts.push(source.estimated_total_rows.to_string());
        }
        parts.push(self.target_sample_size.to_string());
        parts.push(format!("{:?}", self.strategy));
        parts.push(format!("{:?}", self.seed));
        Ok(InputIdentity::from_parts(&parts))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub label: String,
    pub path: PathBuf,
    pub rows_read: usize,
    pub rows_sampled: usize,
    pub probability: f64,
}

/// The sampled union of both datasets. Rows of the first dataset come first;
/// every row carries a unique integer label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightTable {
    frame: DataFrame,
    sources: Vec<SourceSummary>,
}

impl FlightTable {
    #[must_use]
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    #[must_use]
    pub fn sources(&self) -> &[SourceSummary] {
        &self.sources
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Wrap an in-memory frame, e.g. one produced by [`read_csv_str`].
    #[must_use]
    pub fn from_frame(frame: DataFrame) -> Self {
        Self {
            sources: Vec::new(),
            frame,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledFrame {
    pub frame: DataFrame,
    pub rows_read: usize,
}

/// Read a delimited stream, keeping the header and a random subset of rows.
/// Row labels start at `first_label`.
pub fn read_sampled_csv<R, G>(
    input: R,
    plan: SamplingPlan,
    strategy: SamplingStrategy,
    rng: &mut G,
    first_label: i64,
) -> Result<SampledFrame, IoError>
where
    R: Read,
    G: Rng + ?Sized,
{
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);
    let headers = reader.headers()?.clone();
    if headers.is_empty() || headers.iter().all(|name| name.trim().is_empty()) {
        return Err(IoError::MissingHeaders);
    }

    let mut rows_read = 0_usize;
    let kept = match strategy {
        SamplingStrategy::Bernoulli => {
            let sampler = BernoulliSampler::new(plan);
            let mut kept = Vec::new();
            for row in reader.records() {
                let record = row?;
                rows_read += 1;
                if sampler.admit(rng) {
                    kept.push(record);
                }
            }
            kept
        }
        SamplingStrategy::Reservoir => {
            let capacity = plan.target_sample_size;
            let mut reservoir = Vec::<(usize, StringRecord)>::new();
            for row in reader.records() {
                let record = row?;
                let seen = rows_read;
                rows_read += 1;
                if reservoir.len() < capacity {
                    reservoir.push((seen, record));
                    continue;
                }
                let slot = rng.random_range(0..=seen);
                if slot < capacity {
                    reservoir[slot] = (seen, record);
                }
            }
            reservoir.sort_by_key(|(position, _)| *position);
            reservoir.into_iter().map(|(_, record)| record).collect()
        }
    };

    let frame = records_to_frame(&headers, &kept, first_label)?;
    Ok(SampledFrame { frame, rows_read })
}

/// Read every row of an in-memory CSV document.
pub fn read_csv_str(input: &str) -> Result<DataFrame, IoError> {
    let plan = SamplingPlan {
        target_sample_size: 1,
        estimated_total_rows: 0,
    };
    let mut rng = SmallRng::seed_from_u64(0);
    let sampled = read_sampled_csv(
        input.as_bytes(),
        plan,
        SamplingStrategy::Bernoulli,
        &mut rng,
        0,
    )?;
    Ok(sampled.frame)
}

fn records_to_frame(
    headers: &StringRecord,
    records: &[StringRecord],
    first_label: i64,
) -> Result<DataFrame, IoError> {
    let columns = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = records
                .iter()
                .map(|record| record.get(idx).unwrap_or_default())
                .collect::<Vec<_>>();
            let parsed = cells.iter().map(|cell| Scalar::parse_field(cell)).collect();
            let column = match Column::from_values(parsed) {
                Ok(column) => column,
                Err(_) => Column::from_text(cells.into_iter().map(str::to_owned).collect()),
            };
            (name.trim().to_owned(), column)
        })
        .collect::<Vec<_>>();

    Ok(DataFrame::new(
        Index::range(first_label, records.len()),
        columns,
    )?)
}

/// Load both datasets and stack them. Any failure on either file is fatal:
/// no partial table is returned.
pub fn load_flight_table(config: &LoaderConfig) -> Result<FlightTable, IoError> {
    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    load_flight_table_with_rng(config, &mut rng)
}

pub fn load_flight_table_with_rng<G: Rng + ?Sized>(
    config: &LoaderConfig,
    rng: &mut G,
) -> Result<FlightTable, IoError> {
    let mut frame: Option<DataFrame> = None;
    let mut sources = Vec::with_capacity(config.datasets.len());

    for source in &config.datasets {
        let plan = config.plan_for(source);
        let file = File::open(&source.path).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(path = %source.path.display(), error = %err, "dataset unavailable");
            IoError::unavailable(&source.path, err)
        })?;

        let first_label = frame.as_ref().map_or(0, |f| f.height() as i64);
        let sampled = read_sampled_csv(
            BufReader::new(file),
            plan,
            config.strategy,
            rng,
            first_label,
        )
        .map_err(|err| IoError::unavailable(&source.path, err))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            dataset = %source.label,
            rows_read = sampled.rows_read,
            rows_sampled = sampled.frame.height(),
            probability = plan.probability(),
            "dataset sampled"
        );

        sources.push(SourceSummary {
            label: source.label.clone(),
            path: source.path.clone(),
            rows_read: sampled.rows_read,
            rows_sampled: sampled.frame.height(),
            probability: plan.probability(),
        });

        frame = Some(match frame {
            None => sampled.frame,
            Some(top) => top
                .concat(&sampled.frame)
                .map_err(|err| IoError::unavailable(&source.path, err))?,
        });
    }

    Ok(FlightTable {
        frame: frame.unwrap_or_else(DataFrame::empty),
        sources,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use ss_types::{DType, Scalar};

    use super::{
        BernoulliSampler, DatasetSource, IoError, LoaderConfig, SamplingPlan, SamplingStrategy,
        load_flight_table, read_csv_str, read_sampled_csv,
    };

    fn numbered_csv(rows: usize) -> String {
        let mut out = String::from("Month,Airline,DepDelayMinutes\n");
        for row in 0..rows {
            out.push_str(&format!("{},AA,{}\n", row % 12 + 1, row % 60));
        }
        out
    }

    #[test]
    fn plan_probability_matches_target_over_estimate() {
        let plan = SamplingPlan {
            target_sample_size: 20_000,
            estimated_total_rows: 2_500_000,
        };
        assert!((plan.probability() - 0.008).abs() < 1e-12);

        let oversized = SamplingPlan {
            target_sample_size: 50,
            estimated_total_rows: 10,
        };
        assert_eq!(oversized.probability(), 1.0);
    }

    #[test]
    fn bernoulli_sampler_hits_target_in_expectation() {
        // 2.5M trials at p = 0.008: mean 20_000, sd ~ 140.9.
        let plan = SamplingPlan {
            target_sample_size: 20_000,
            estimated_total_rows: 2_500_000,
        };
        let sampler = BernoulliSampler::new(plan);
        let mut rng = SmallRng::seed_from_u64(2021);
        let kept = (0..2_500_000).filter(|_| sampler.admit(&mut rng)).count();
        assert!((19_300..=20_700).contains(&kept), "kept={kept}");
    }

    #[test]
    fn stale_estimate_drifts_sample_size_proportionally() {
        let plan = SamplingPlan {
            target_sample_size: 1_000,
            estimated_total_rows: 10_000,
        };
        let mut rng = SmallRng::seed_from_u64(9);
        let csv = numbered_csv(20_000);
        let sampled = read_sampled_csv(
            csv.as_bytes(),
            plan,
            SamplingStrategy::Bernoulli,
            &mut rng,
            0,
        )
        .expect("sample");
        assert_eq!(sampled.rows_read, 20_000);
        // Twice the estimated rows: expect ~2_000 kept, sd ~ 42.
        assert!(
            (1_800..=2_200).contains(&sampled.frame.height()),
            "kept={}",
            sampled.frame.height()
        );
    }

    #[test]
    fn reservoir_strategy_keeps_exact_count_in_file_order() {
        let plan = SamplingPlan {
            target_sample_size: 25,
            estimated_total_rows: 1_000,
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let csv = numbered_csv(1_000);
        let sampled = read_sampled_csv(
            csv.as_bytes(),
            plan,
            SamplingStrategy::Reservoir,
            &mut rng,
            100,
        )
        .expect("sample");

        assert_eq!(sampled.frame.height(), 25);
        assert_eq!(sampled.frame.index().labels()[0], 100_i64.into());
        assert!(!sampled.frame.index().has_duplicates());

        let small = read_sampled_csv(
            numbered_csv(10).as_bytes(),
            plan,
            SamplingStrategy::Reservoir,
            &mut rng,
            0,
        )
        .expect("small");
        assert_eq!(small.frame.height(), 10);
    }

    #[test]
    fn reservoir_with_huge_target_keeps_every_row() {
        let plan = SamplingPlan {
            target_sample_size: usize::MAX / 2,
            estimated_total_rows: 10,
        };
        let mut rng = SmallRng::seed_from_u64(4);
        let sampled = read_sampled_csv(
            "Month\n1\n2\n".as_bytes(),
            plan,
            SamplingStrategy::Reservoir,
            &mut rng,
            0,
        )
        .expect("sample");
        assert_eq!(sampled.rows_read, 2);
        assert_eq!(sampled.frame.height(), 2);
    }

    #[test]
    fn header_is_kept_even_when_no_row_is_sampled() {
        let plan = SamplingPlan {
            target_sample_size: 0,
            estimated_total_rows: 100,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let sampled = read_sampled_csv(
            numbered_csv(100).as_bytes(),
            plan,
            SamplingStrategy::Bernoulli,
            &mut rng,
            0,
        )
        .expect("sample");
        assert!(sampled.frame.is_empty());
        assert_eq!(
            sampled.frame.column_names(),
            &["Month", "Airline", "DepDelayMinutes"]
        );
    }

    #[test]
    fn read_csv_str_infers_flight_column_types() {
        let frame = read_csv_str(
            "Airline,CRSDepTime,DepDelayMinutes,Cancelled,DepTimeBlk,Tail\n\
             AA,805,10.0,False,0800-0859,N101\n\
             DL,1730,,True,1700-1759,202\n",
        )
        .expect("read");

        assert_eq!(frame.column("Airline").expect("airline").dtype(), DType::Utf8);
        assert_eq!(frame.column("CRSDepTime").expect("crs").dtype(), DType::Int64);
        let delay = frame.column("DepDelayMinutes").expect("delay");
        assert_eq!(delay.dtype(), DType::Float64);
        assert!(delay.values()[1].is_missing());
        assert_eq!(frame.column("Cancelled").expect("cancelled").dtype(), DType::Bool);
        // Mixed text and digits fall back to text.
        assert_eq!(
            frame.column("Tail").expect("tail").values(),
            &[Scalar::from("N101"), Scalar::from("202")]
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = read_csv_str("Month,Airline\n1,AA\n2\n").expect_err("ragged");
        assert!(matches!(err, IoError::Csv(_)));
    }

    #[test]
    fn missing_dataset_is_data_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let present = dir.path().join("a.csv");
        std::fs::File::create(&present)
            .and_then(|mut file| file.write_all(numbered_csv(5).as_bytes()))
            .expect("write");

        let config = LoaderConfig {
            datasets: [
                DatasetSource {
                    label: "a".to_owned(),
                    path: present,
                    estimated_total_rows: 5,
                },
                DatasetSource {
                    label: "b".to_owned(),
                    path: dir.path().join("absent.csv"),
                    estimated_total_rows: 5,
                },
            ],
            seed: Some(1),
            ..LoaderConfig::default()
        };

        let err = load_flight_table(&config).expect_err("second file is missing");
        assert!(matches!(err, IoError::DataUnavailable { .. }));
        assert!(err.to_string().contains("absent.csv"));
        assert!(config.identity().is_err());
    }

    #[test]
    fn loader_config_round_trips_through_json() {
        let config = LoaderConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("\"strategy\":\"bernoulli\""));
        let back: LoaderConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);

        let partial: LoaderConfig =
            serde_json::from_str(r#"{"target_sample_size": 500}"#).expect("defaults fill in");
        assert_eq!(partial.target_sample_size, 500);
        assert_eq!(partial.datasets[0].estimated_total_rows, 2_500_000);
    }
}
