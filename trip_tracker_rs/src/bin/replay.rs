use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;
use trip_tracker_rs::accuracy::{AcquisitionMode, ModeSelector};
use trip_tracker_rs::classifier::{RoleClassifier, RoleVerdict, SignalWindow, UsageSnapshot};
use trip_tracker_rs::filters::{FilterDecision, FilterState, FilterStats, QualityFilter};
use trip_tracker_rs::risk::RiskMetrics;
use trip_tracker_rs::trip::{TripAccumulator, TripStatus};
use trip_tracker_rs::types::{MotionSample, PositionFix};
use trip_tracker_rs::TrackerConfig;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a recorded trip log through the filter, accumulator and classifier")]
struct Args {
    /// Path to a trip log (.json or .json.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of trip logs to batch replay (trip_*.json[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Tracker config JSON (defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Battery level assumed for mode selection
    #[arg(long, default_value = "100")]
    battery: u8,
}

#[derive(Deserialize)]
struct UsageEntry {
    #[serde(default)]
    screen_on_secs: u64,
    #[serde(default)]
    touch_events: u32,
    #[serde(default)]
    app_launches: u32,
}

#[derive(Deserialize)]
struct LogFile {
    fixes: Vec<PositionFix>,
    #[serde(default)]
    motion: Vec<MotionSample>,
    usage: Option<UsageEntry>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

fn run_once(path: &Path, config: &TrackerConfig, battery: u8) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path)?;
    let mut fixes = log.fixes;
    fixes.sort_by_key(|f| f.timestamp_ms);
    let mut motion = log.motion;
    motion.sort_by_key(|m| m.timestamp_ms);
    let usage = log
        .usage
        .map(|u| {
            UsageSnapshot::new(
                Duration::from_secs(u.screen_on_secs),
                u.touch_events,
                u.app_launches,
            )
        })
        .unwrap_or_default();

    let Some(first) = fixes.first() else {
        anyhow::bail!("{} has no fixes", path.display());
    };
    let start_ms = first.timestamp_ms;

    let filter = QualityFilter::new(config.filter.clone());
    let selector = ModeSelector::new(config.selector.clone());
    let mut state = FilterState::new(config.filter.history_capacity);
    let mut stats = FilterStats::default();
    let mut trip = TripAccumulator::new(start_ms);
    let mut mode = selector.select_mode(battery, 0.0, 0);
    let mut mode_time: BTreeMap<AcquisitionMode, usize> = BTreeMap::new();
    let mut mode_switches = 0usize;

    for fix in &fixes {
        // Offline: judge each fix against its own timestamp
        let decision = filter.evaluate(fix, &state, fix.timestamp_ms);
        stats.record(decision);
        if let FilterDecision::Reject(reason) = decision {
            log::debug!("t={} rejected: {:?}", fix.timestamp_ms, reason);
            continue;
        }
        state.commit(*fix);
        trip.on_fix(fix)?;
        *mode_time.entry(mode).or_insert(0) += 1;

        let speed_kmh = if fix.has_valid_speed() { fix.speed_kmh() } else { 0.0 };
        let next = selector.select_mode(battery, speed_kmh, fix.timestamp_ms - start_ms);
        if next != mode {
            log::info!("t={} mode {} -> {}", fix.timestamp_ms, mode, next);
            mode = next;
            mode_switches += 1;
        }
    }

    let classifier = RoleClassifier::new(config.classifier.clone());
    let mut window = SignalWindow::new(config.classifier.window_size);
    let cadence = config.session.classification_interval_ms as i64;
    let mut next_eval = motion.first().map(|m| m.timestamp_ms + cadence);
    let mut verdicts: Vec<RoleVerdict> = Vec::new();
    for sample in &motion {
        window.push(sample);
        if let Some(due) = next_eval {
            if sample.timestamp_ms >= due {
                verdicts.push(classifier.classify(&window.summary(), &usage, sample.timestamp_ms));
                next_eval = Some(due + cadence);
            }
        }
    }
    let final_verdict = classifier.classify(
        &window.summary(),
        &usage,
        motion.last().map(|m| m.timestamp_ms).unwrap_or(start_ms),
    );
    let mut role_counts: BTreeMap<String, usize> = BTreeMap::new();
    for v in &verdicts {
        *role_counts.entry(v.role.to_string()).or_insert(0) += 1;
    }

    let end_ms = fixes.last().map(|f| f.timestamp_ms).unwrap_or(start_ms);
    trip.record_verdict(final_verdict.clone());
    let record = trip.finalize(end_ms, TripStatus::Completed);
    let risk = RiskMetrics::for_trip(&record);

    let rejections: BTreeMap<String, u64> = stats
        .rejections
        .iter()
        .map(|(reason, count)| (format!("{:?}", reason), *count))
        .collect();
    let modes: BTreeMap<String, usize> = mode_time
        .iter()
        .map(|(mode, count)| (mode.to_string(), *count))
        .collect();

    Ok(json!({
        "log": path.display().to_string(),
        "fixes_processed": stats.processed,
        "fixes_accepted": stats.accepted,
        "acceptance_rate": stats.acceptance_rate(),
        "rejections": rejections,
        "distance_km": record.distance_km(),
        "duration_s": record.duration_ms() as f64 / 1000.0,
        "avg_speed_kmh": record.avg_speed_kmh(),
        "max_speed_kmh": record.max_speed_kmh(),
        "mode_switches": mode_switches,
        "fixes_per_mode": modes,
        "motion_samples": motion.len(),
        "verdicts": role_counts,
        "final_role": final_verdict.role.to_string(),
        "final_confidence": final_verdict.confidence,
        "final_reasoning": final_verdict.reasoning,
        "risk": risk,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };

    let mut results = Vec::new();
    if let Some(dir) = args.log_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.starts_with("trip_") && (name.ends_with(".json") || name.ends_with(".json.gz"))) {
                continue;
            }
            match run_once(&path, &config, args.battery) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, args.battery)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
