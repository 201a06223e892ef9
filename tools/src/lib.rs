pub mod report;

pub use report::{CoverageReport, ScaleCoverage};
