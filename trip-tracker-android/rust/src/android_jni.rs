use crate::bridge::{to_json, Bridge};
use crate::error::{throw_java_exception, BridgeError, JResult};
use crate::sensor_receiver::{location_to_fix, motion_sample};
use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jdouble, jint, jlong, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use std::sync::Mutex;

// Global bridge - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref GLOBAL_BRIDGE: Mutex<Option<Bridge>> = Mutex::new(None);
}

/// Run `f` against the initialized bridge
fn with_bridge<T>(f: impl FnOnce(&mut Bridge) -> JResult<T>) -> JResult<T> {
    let mut guard = GLOBAL_BRIDGE.lock().map_err(|_| {
        BridgeError::Internal("Failed to acquire global bridge lock".to_string())
    })?;
    let bridge = guard.as_mut().ok_or(BridgeError::NotInitialized)?;
    f(bridge)
}

fn read_string(env: &mut JNIEnv, value: &JString) -> JResult<String> {
    if value.is_null() {
        return Ok(String::new());
    }
    env.get_string(value)
        .map(Into::into)
        .map_err(|e| BridgeError::JniError(format!("Failed to read Java string: {}", e)))
}

/// Convert a result to a Java string; errors throw and return null
fn string_result(env: &mut JNIEnv, result: JResult<String>) -> jstring {
    match result {
        Ok(value) => match env.new_string(&value) {
            Ok(jstr) => jstr.into_raw(),
            Err(_) => {
                let _ = throw_java_exception(
                    env,
                    &BridgeError::JniError("Failed to create Java string".to_string()),
                );
                std::ptr::null_mut()
            }
        },
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            std::ptr::null_mut()
        }
    }
}

/// Convert a unit result to a status code; errors throw and return -1
fn status_result(env: &mut JNIEnv, result: JResult<()>) -> jint {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// JNI: Create the bridge with a trip storage directory and optional config JSON.
/// Replaces a previous bridge only when no session is running.
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_initialize(
    mut env: JNIEnv,
    _class: JClass,
    storage_dir: JString,
    config_json: JString,
) -> jint {
    let result = initialize_impl(&mut env, &storage_dir, &config_json);
    status_result(&mut env, result)
}

fn initialize_impl(env: &mut JNIEnv, storage_dir: &JString, config_json: &JString) -> JResult<()> {
    let dir = read_string(env, storage_dir)?;
    if dir.is_empty() {
        return Err(BridgeError::InvalidParameters(
            "storage directory is required".to_string(),
        ));
    }
    let config = Bridge::parse_config(&read_string(env, config_json)?)?;

    let mut guard = GLOBAL_BRIDGE.lock().map_err(|_| {
        BridgeError::Internal("Failed to acquire global bridge lock".to_string())
    })?;
    if guard.as_ref().map(|b| b.status().trip_id.is_some()).unwrap_or(false) {
        return Err(trip_tracker_rs::TrackerError::AlreadyRunning.into());
    }
    *guard = Some(Bridge::new(&dir, config)?);
    log::info!("Trip tracker bridge initialized at {}", dir);
    Ok(())
}

/// JNI: Start a new trip
/// Returns: trip id, or null on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_startSession(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_bridge(|bridge| bridge.start_session());
    string_result(&mut env, result)
}

/// JNI: Stop the current trip
/// Returns: finalized trip record JSON, or null on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_stopSession(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_bridge(|bridge| to_json(&bridge.stop_session()?));
    string_result(&mut env, result)
}

/// JNI: Deliver an `android.location.Location`
/// Returns: JNI_TRUE when a subscription took the fix
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_pushLocation(
    mut env: JNIEnv,
    _class: JClass,
    latitude: jdouble,
    longitude: jdouble,
    time_ms: jlong,
    speed: jdouble,
    has_speed: jboolean,
    accuracy: jdouble,
    has_accuracy: jboolean,
) -> jboolean {
    let fix = location_to_fix(
        latitude,
        longitude,
        time_ms,
        speed,
        has_speed != JNI_FALSE,
        accuracy,
        has_accuracy != JNI_FALSE,
    );
    match with_bridge(|bridge| Ok(bridge.push_location(fix))) {
        Ok(delivered) => to_jboolean(delivered),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            JNI_FALSE
        }
    }
}

/// JNI: Deliver a linear acceleration or gyroscope `SensorEvent`
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_pushMotionSample(
    mut env: JNIEnv,
    _class: JClass,
    sensor_type: jint,
    x: jdouble,
    y: jdouble,
    z: jdouble,
    timestamp_ms: jlong,
) -> jint {
    let result = push_motion_sample_impl(sensor_type, x, y, z, timestamp_ms);
    status_result(&mut env, result)
}

fn push_motion_sample_impl(sensor_type: i32, x: f64, y: f64, z: f64, timestamp_ms: i64) -> JResult<()> {
    let sample = motion_sample(sensor_type, x, y, z, timestamp_ms)?;
    with_bridge(|bridge| {
        // Samples outside a session are dropped
        bridge.push_motion(sample);
        Ok(())
    })
}

/// JNI: Battery level and power-save mode
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_setBattery(
    mut env: JNIEnv,
    _class: JClass,
    percent: jint,
    power_save: jboolean,
) -> jint {
    let result = with_bridge(|bridge| bridge.set_battery(percent, power_save != JNI_FALSE));
    status_result(&mut env, result)
}

/// JNI: Device usage totals since the session started
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_updateUsage(
    mut env: JNIEnv,
    _class: JClass,
    screen_on_ms: jlong,
    touch_events: jint,
    app_launches: jint,
) -> jint {
    let result = with_bridge(|bridge| bridge.update_usage(screen_on_ms, touch_events, app_launches));
    status_result(&mut env, result)
}

/// JNI: Location permission granted or revoked
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_setLocationPermission(
    mut env: JNIEnv,
    _class: JClass,
    granted: jboolean,
) -> jint {
    let result = with_bridge(|bridge| {
        bridge.set_location_permission(granted != JNI_FALSE);
        Ok(())
    });
    status_result(&mut env, result)
}

/// JNI: Location provider enabled or disabled
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_setProviderAvailable(
    mut env: JNIEnv,
    _class: JClass,
    available: jboolean,
) -> jint {
    let result = with_bridge(|bridge| {
        bridge.set_provider_available(available != JNI_FALSE);
        Ok(())
    });
    status_result(&mut env, result)
}

/// JNI: Bridge and acquisition status as JSON
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_getSessionState(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_bridge(|bridge| bridge.status_json());
    string_result(&mut env, result)
}

/// JNI: Live trip snapshot (distance, speeds, duration) as JSON
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_getTripSnapshotJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_bridge(|bridge| bridge.trip_snapshot_json());
    string_result(&mut env, result)
}

/// JNI: Latest driver/passenger verdict as JSON (`null` before the first one)
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_getRoleVerdictJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_bridge(|bridge| bridge.role_verdict_json());
    string_result(&mut env, result)
}

/// JNI: Saved trips, most recent first, as a JSON array
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_listTripsJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_bridge(|bridge| bridge.list_trips_json());
    string_result(&mut env, result)
}

/// JNI: Risk metrics of a saved trip as JSON
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_getTripRiskJson(
    mut env: JNIEnv,
    _class: JClass,
    trip_id: JString,
) -> jstring {
    let result = read_string(&mut env, &trip_id)
        .and_then(|id| with_bridge(|bridge| bridge.trip_risk_json(&id)));
    string_result(&mut env, result)
}

/// JNI: Delete a saved trip
/// Returns: JNI_TRUE when a trip was removed
#[no_mangle]
pub extern "C" fn Java_com_triptracker_JniBinding_deleteTrip(
    mut env: JNIEnv,
    _class: JClass,
    trip_id: JString,
) -> jboolean {
    let result = read_string(&mut env, &trip_id)
        .and_then(|id| with_bridge(|bridge| bridge.delete_trip(&id)));
    match result {
        Ok(deleted) => to_jboolean(deleted),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            JNI_FALSE
        }
    }
}
