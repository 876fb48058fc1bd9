#![allow(dead_code)]

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(32);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 256;
    config
}

/// Commit-title needle selecting batch `index` (0-based) of `total`.
pub fn batch_needle(index: usize, total: usize) -> String {
    if total > 1 {
        format!("(batch {}/{})", index + 1, total)
    } else {
        "Upload".to_string()
    }
}

/// A multi-file upload scenario: how many files exist, how many are missing
/// on disk, the batch size, and which batches the hub rejects.
#[derive(Clone, Debug)]
pub struct UploadScenario {
    pub readable: usize,
    pub missing: usize,
    pub batch_size: usize,
    pub failing_batches: Vec<bool>,
}

pub fn arb_upload_scenario() -> impl Strategy<Value = UploadScenario> {
    (0usize..40, 0usize..5, 1usize..12)
        .prop_filter("at least one file", |(readable, missing, _)| {
            readable + missing > 0
        })
        .prop_flat_map(|(readable, missing, batch_size)| {
            let batches = (readable + missing).div_ceil(batch_size);
            proptest::collection::vec(any::<bool>(), batches).prop_map(move |failing_batches| {
                UploadScenario {
                    readable,
                    missing,
                    batch_size,
                    failing_batches,
                }
            })
        })
}
