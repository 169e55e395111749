use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration};

use trip_tracker_rs::gpx;
use trip_tracker_rs::session::{SessionEvent, SessionSources, TrackingSession};
use trip_tracker_rs::sources::{
    MotionProfile, SharedPower, SharedUsage, SimulatedMotionSource, SimulatedPositionSource,
};
use trip_tracker_rs::store::JsonTripStore;
use trip_tracker_rs::{RiskMetrics, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "trip_tracker")]
#[command(about = "Trip tracker - adaptive GPS acquisition with driver/passenger detection", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Output directory for trip JSON and GPX files
    #[arg(long, default_value = "trip_tracker_trips")]
    output_dir: PathBuf,

    /// Simulated battery level (percent)
    #[arg(long, default_value = "100")]
    battery: u8,

    /// Simulate power-save mode
    #[arg(long)]
    power_save: bool,

    /// Simulate a handheld phone instead of a mounted one
    #[arg(long)]
    handheld: bool,

    /// Tracker config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start latitude of the simulated drive
    #[arg(long, default_value = "40.7128")]
    lat: f64,

    /// Start longitude of the simulated drive
    #[arg(long, default_value = "-74.0060")]
    lon: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };

    println!("[{}] Trip Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=until Ctrl-C)", args.duration);
    println!("  Battery: {}%{}", args.battery, if args.power_save { " (power save)" } else { "" });
    println!("  Phone: {}", if args.handheld { "handheld" } else { "mounted" });
    println!("  Output Dir: {}", args.output_dir.display());

    let store = Arc::new(JsonTripStore::open(&args.output_dir)?);
    let profile = if args.handheld {
        MotionProfile::Handheld
    } else {
        MotionProfile::Mounted
    };
    let sources = SessionSources {
        position: Arc::new(SimulatedPositionSource::new(args.lat, args.lon)),
        motion: Arc::new(SimulatedMotionSource::new(profile)),
        power: Arc::new(SharedPower::new(args.battery, args.power_save)),
        usage: Arc::new(SharedUsage::new()),
    };

    let mut session = TrackingSession::start(config, sources, store)?;
    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("session event channel unavailable"))?;

    let deadline = async {
        if args.duration > 0 {
            sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);
    let mut status_ticker = interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Started { trip_id, mode }) => {
                    println!("[{}] Trip {} started ({})", ts_now(), trip_id, mode);
                }
                Some(SessionEvent::ModeChanged(change)) => {
                    println!("[{}] Mode {} -> {} ({:?})", ts_now(), change.from, change.to, change.reason);
                }
                Some(SessionEvent::Fix(accepted)) => {
                    log::debug!(
                        "Fix {:.6},{:.6} {:.1} km/h q={}",
                        accepted.fix.latitude,
                        accepted.fix.longitude,
                        accepted.fix.speed_kmh(),
                        accepted.quality.score()
                    );
                }
                Some(SessionEvent::Error(e)) => {
                    eprintln!("[{}] Session error: {}", ts_now(), e);
                }
                Some(SessionEvent::Stopped { .. }) | None => break,
            },
            _ = status_ticker.tick() => {
                let snap = session.snapshot();
                let role = session
                    .verdict()
                    .map(|v| format!("{} ({:.2})", v.role, v.confidence))
                    .unwrap_or_else(|| "pending".to_string());
                println!(
                    "[{}] {:.0}s  {:.2} km  avg {:.1} km/h  max {:.1} km/h  fixes {}  role {}",
                    ts_now(),
                    snap.duration_ms as f64 / 1000.0,
                    snap.distance_m / 1000.0,
                    snap.avg_speed_ms * 3.6,
                    snap.max_speed_ms * 3.6,
                    snap.fix_count,
                    role
                );
            }
        }
    }

    let status = session.status();
    let record = session.stop().await?;

    let gpx_path = args.output_dir.join(format!("{}.gpx", record.id));
    std::fs::write(&gpx_path, gpx::to_gpx(&record))?;

    println!("\n=== Trip {} ({:?}) ===", record.id, record.status);
    println!("Duration: {:.1} s", record.duration_ms() as f64 / 1000.0);
    println!("Distance: {:.2} km ({:.2} mi)", record.distance_km(), record.distance_miles());
    println!("Avg speed: {:.1} km/h, max {:.1} km/h", record.avg_speed_kmh(), record.max_speed_kmh());
    println!(
        "Fixes: {} accepted of {} ({:.0}% filtered)",
        record.fix_count,
        status.filter.processed,
        status.filter.filter_rate() * 100.0
    );
    if let Some(verdict) = record.role.as_ref() {
        println!("Role: {} ({:.2}) - {}", verdict.role, verdict.confidence, verdict.reasoning);
    }
    let risk = RiskMetrics::for_trip(&record);
    println!(
        "Risk: {:.2} x {:.1} = {:.2}, premium factor {:.1}",
        risk.base_risk_score, risk.role_adjustment, risk.adjusted_risk_score, risk.recommended_premium
    );
    println!("Saved {} and {}", args.output_dir.join(format!("{}.json", record.id)).display(), gpx_path.display());

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
