//! Trip tracker core: adaptive location acquisition and driver/passenger
//! classification.
//!
//! Fixes flow from a [`sources::PositionSource`] through the
//! [`filters::QualityFilter`] into the [`trip::TripAccumulator`]; the
//! [`accuracy::ModeSelector`] picks the acquisition mode after every accepted
//! fix. Motion samples fill a [`classifier::SignalWindow`] that the
//! [`classifier::RoleClassifier`] summarizes on a fixed cadence. The
//! [`session`] module wires both pipelines onto tokio tasks.

pub mod accuracy;
pub mod acquisition;
pub mod classifier;
pub mod config;
pub mod error;
pub mod filters;
pub mod geo_math;
pub mod gpx;
pub mod risk;
pub mod session;
pub mod sources;
pub mod store;
pub mod trip;
pub mod types;

pub use accuracy::{AcquisitionMode, LocationRequest, ModeSelector};
pub use acquisition::{AcquisitionLoop, AcquisitionState};
pub use classifier::{RoleClassifier, RoleVerdict, SignalWindow, UsageSnapshot, UserRole};
pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use risk::RiskMetrics;
pub use session::{SessionEvent, SessionHandle, SessionSources, TrackingSession};
pub use store::{JsonTripStore, MemoryTripStore, TripStore};
pub use trip::{TripAccumulator, TripRecord, TripSnapshot, TripStatus};
pub use types::{AcceptedFix, FixQuality, MotionSample, PositionFix};
