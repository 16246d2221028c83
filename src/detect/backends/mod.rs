pub mod synthetic;

pub use synthetic::{SyntheticDetector, SyntheticDetectorConfig};
