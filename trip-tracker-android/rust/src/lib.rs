// Trip Tracker Android JNI Library
// Exposes the Rust trip tracking core to Kotlin via JNI

pub mod android_jni;
pub mod bridge;
pub mod error;
pub mod sensor_receiver;

pub use bridge::{Bridge, BridgeState, BridgeStatus};
pub use error::{BridgeError, JResult};
