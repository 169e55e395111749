use jni::JNIEnv;
use thiserror::Error;
use trip_tracker_rs::TrackerError;

/// Errors surfaced across the JNI boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Bridge not initialized")]
    NotInitialized,

    #[error("No tracking session")]
    NoSession,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, BridgeError>;

/// Java exception class thrown for an error
pub fn exception_class(error: &BridgeError) -> &'static str {
    match error {
        BridgeError::Tracker(TrackerError::PermissionDenied)
        | BridgeError::Tracker(TrackerError::SecurityRevoked(_)) => "java/lang/SecurityException",
        BridgeError::Tracker(TrackerError::AlreadyRunning)
        | BridgeError::Tracker(TrackerError::NotRunning)
        | BridgeError::Tracker(TrackerError::InvalidState(_))
        | BridgeError::Tracker(TrackerError::TripFinalized)
        | BridgeError::NotInitialized
        | BridgeError::NoSession => "java/lang/IllegalStateException",
        BridgeError::Tracker(TrackerError::Config(_)) | BridgeError::InvalidParameters(_) => {
            "java/lang/IllegalArgumentException"
        }
        BridgeError::Tracker(TrackerError::ProviderUnavailable(_))
        | BridgeError::Tracker(TrackerError::Storage(_)) => "java/io/IOException",
        BridgeError::Tracker(TrackerError::ClassificationFailure(_))
        | BridgeError::Tracker(TrackerError::Internal(_))
        | BridgeError::JniError(_)
        | BridgeError::Internal(_) => "java/lang/RuntimeException",
    }
}

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &BridgeError) -> JResult<()> {
    log::error!("{}", error);
    env.throw_new(exception_class(error), error.to_string())
        .map_err(|_| BridgeError::JniError("Failed to throw exception".to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_mapping() {
        assert_eq!(
            exception_class(&TrackerError::PermissionDenied.into()),
            "java/lang/SecurityException"
        );
        assert_eq!(
            exception_class(&TrackerError::AlreadyRunning.into()),
            "java/lang/IllegalStateException"
        );
        assert_eq!(
            exception_class(&TrackerError::ProviderUnavailable("gps off".into()).into()),
            "java/io/IOException"
        );
        assert_eq!(
            exception_class(&BridgeError::InvalidParameters("bad".into())),
            "java/lang/IllegalArgumentException"
        );
        assert_eq!(exception_class(&BridgeError::NoSession), "java/lang/IllegalStateException");
    }

    #[test]
    fn test_tracker_message_is_transparent() {
        let err: BridgeError = TrackerError::PermissionDenied.into();
        assert_eq!(err.to_string(), "Location permission not granted");
    }
}
