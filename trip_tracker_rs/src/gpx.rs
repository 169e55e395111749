/// GPX 1.1 export of a finished trip for mapping applications
use crate::trip::TripRecord;
use crate::types::PositionFix;
use chrono::{TimeZone, Utc};

#[derive(Debug, Clone)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    pub time: String,
    /// Approximated from the reported accuracy radius
    pub hdop: Option<f64>,
    pub speed_ms: Option<f64>,
}

impl GpxPoint {
    fn from_fix(fix: &PositionFix) -> Self {
        let time = Utc
            .timestamp_millis_opt(fix.timestamp_ms)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        GpxPoint {
            lat: fix.latitude,
            lon: fix.longitude,
            time,
            hdop: fix.accuracy_m.map(|a| a / 2.0),
            speed_ms: fix.has_valid_speed().then_some(fix.speed_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub points: Vec<GpxPoint>,
}

impl GpxTrack {
    pub fn from_record(record: &TripRecord) -> Self {
        let started = record
            .start_time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.start_ms.to_string());
        GpxTrack {
            name: format!("Trip {}", record.id),
            description: format!(
                "Recorded from {}, {:.2} km, {:?}",
                started,
                record.distance_km(),
                record.status
            ),
            points: record.fixes.iter().map(GpxPoint::from_fix).collect(),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(
            "<gpx version=\"1.1\" creator=\"TripTracker\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
        );
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape(&self.name)));
        xml.push_str(&format!("    <desc>{}</desc>\n", escape(&self.description)));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape(&self.name)));
        xml.push_str("    <trkseg>\n");

        for point in &self.points {
            xml.push_str(&format!(
                "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
                point.lat, point.lon
            ));
            xml.push_str(&format!("        <time>{}</time>\n", point.time));
            if let Some(hdop) = point.hdop {
                xml.push_str(&format!("        <hdop>{:.1}</hdop>\n", hdop));
            }
            if let Some(speed) = point.speed_ms {
                xml.push_str(&format!(
                    "        <extensions><speed>{:.2}</speed></extensions>\n",
                    speed
                ));
            }
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");
        xml
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn to_gpx(record: &TripRecord) -> String {
    GpxTrack::from_record(record).to_xml()
}
