/// Mean Earth radius used for every distance in the crate (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const MS_TO_KMH: f64 = 3.6;
pub const MS_TO_MPH: f64 = 2.23694;
pub const METERS_TO_MILES: f64 = 0.000621371;
pub const METERS_TO_KM: f64 = 0.001;

/// Great-circle distance between two WGS84 points (meters).
///
/// This is the only distance function used by the filter and the trip
/// accumulator, so incremental and batch distances always agree.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

pub fn ms_to_kmh(speed_ms: f64) -> f64 {
    speed_ms * MS_TO_KMH
}

pub fn kmh_to_ms(speed_kmh: f64) -> f64 {
    speed_kmh / MS_TO_KMH
}

pub fn ms_to_mph(speed_ms: f64) -> f64 {
    speed_ms * MS_TO_MPH
}

pub fn meters_to_km(meters: f64) -> f64 {
    meters * METERS_TO_KM
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters * METERS_TO_MILES
}

/// Average speed over a distance and duration (m/s), zero for empty durations
pub fn average_speed_ms(distance_m: f64, duration_ms: i64) -> f64 {
    if duration_ms <= 0 {
        return 0.0;
    }
    distance_m / (duration_ms as f64 / 1000.0)
}
