//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::time::Duration;
use vision_stream::pipeline::{AssemblySettings, PipelineAssembler};

/// Grace period short enough to keep the suite fast
pub fn test_grace_period() -> Duration {
    Duration::from_millis(200)
}

/// Assembler with default channels and the short test grace period
pub fn test_assembler() -> PipelineAssembler {
    PipelineAssembler::new(AssemblySettings {
        grace_period: test_grace_period(),
        ..AssemblySettings::default()
    })
}

/// Assert that `elapsed` stayed under `limit`
pub fn assert_within(elapsed: Duration, limit: Duration) {
    assert!(
        elapsed < limit,
        "Expected to finish within {:?}, took {:?}",
        limit,
        elapsed
    );
}
