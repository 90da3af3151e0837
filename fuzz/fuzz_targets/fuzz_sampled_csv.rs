#![no_main]

use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use ss_io::{SamplingPlan, SamplingStrategy, read_sampled_csv};

fuzz_target!(|data: &[u8]| {
    let Some((&control, body)) = data.split_first() else {
        return;
    };
    let strategy = if control & 1 == 0 {
        SamplingStrategy::Bernoulli
    } else {
        SamplingStrategy::Reservoir
    };
    let plan = SamplingPlan {
        target_sample_size: usize::from(control >> 1),
        estimated_total_rows: 64,
    };
    let mut rng = SmallRng::seed_from_u64(u64::from(control));

    if let Ok(sampled) = read_sampled_csv(body, plan, strategy, &mut rng, 0) {
        assert!(sampled.frame.height() <= sampled.rows_read);
        assert!(!sampled.frame.index().has_duplicates());
        if strategy == SamplingStrategy::Reservoir {
            assert_eq!(
                sampled.frame.height(),
                sampled.rows_read.min(plan.target_sample_size)
            );
        }
    }
});
