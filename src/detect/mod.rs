mod backend;
mod backends;

use anyhow::{anyhow, Result};

pub use backend::MarkerDetector;
pub use backends::{SyntheticDetector, SyntheticDetectorConfig};

/// Names accepted by `detector_by_name`.
pub const DETECTOR_NAMES: &[&str] = &["synthetic"];

/// Build a detector from its configured name.
pub fn detector_by_name(
    name: &str,
    synthetic: SyntheticDetectorConfig,
) -> Result<Box<dyn MarkerDetector>> {
    match name {
        "synthetic" => Ok(Box::new(SyntheticDetector::new(synthetic))),
        other => Err(anyhow!(
            "unknown detector '{}' (available: {})",
            other,
            DETECTOR_NAMES.join(", ")
        )),
    }
}
