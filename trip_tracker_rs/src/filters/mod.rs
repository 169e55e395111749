/// Per-fix filtering applied by the acquisition loop
pub mod quality;

pub use quality::{FilterDecision, FilterState, FilterStats, QualityFilter, RejectReason};
