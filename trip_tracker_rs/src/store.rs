/// Trip persistence.
///
/// `JsonTripStore` writes one pretty-printed JSON file per trip, the same
/// export format the recorder has always produced; `MemoryTripStore` backs
/// tests and short-lived sessions.
use crate::error::{Result, TrackerError};
use crate::trip::TripRecord;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait TripStore: Send + Sync {
    /// Insert or replace a trip
    fn save(&self, record: &TripRecord) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<TripRecord>>;

    /// All trips, most recent first
    fn list(&self) -> Result<Vec<TripRecord>>;

    /// Returns false when the trip did not exist
    fn delete(&self, id: &str) -> Result<bool>;

    fn delete_all(&self) -> Result<()>;

    fn count(&self) -> Result<usize>;
}

fn sort_recent_first(records: &mut [TripRecord]) {
    records.sort_by(|a, b| b.start_ms.cmp(&a.start_ms).then_with(|| a.id.cmp(&b.id)));
}

/// Directory of `<trip id>.json` files
pub struct JsonTripStore {
    dir: PathBuf,
}

impl JsonTripStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(TrackerError::Storage(format!("invalid trip id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn trip_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl TripStore for JsonTripStore {
    fn save(&self, record: &TripRecord) -> Result<()> {
        let path = self.path_for(&record.id)?;
        let json = serde_json::to_string_pretty(record)?;
        // Write-then-rename so a crash never leaves a truncated trip behind
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        log::debug!("Saved trip {} to {}", record.id, path.display());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<TripRecord>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn list(&self) -> Result<Vec<TripRecord>> {
        let mut records = Vec::new();
        for path in self.trip_files()? {
            let text = fs::read_to_string(&path)?;
            match serde_json::from_str::<TripRecord>(&text) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable trip file {}: {}", path.display(), e),
            }
        }
        sort_recent_first(&mut records);
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn delete_all(&self) -> Result<()> {
        for path in self.trip_files()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.trip_files()?.len())
    }
}

#[derive(Default)]
pub struct MemoryTripStore {
    trips: Mutex<HashMap<String, TripRecord>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TripRecord>>> {
        self.trips
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire trip store lock".to_string()))
    }
}

impl TripStore for MemoryTripStore {
    fn save(&self, record: &TripRecord) -> Result<()> {
        self.lock()?.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<TripRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<TripRecord>> {
        let mut records: Vec<TripRecord> = self.lock()?.values().cloned().collect();
        sort_recent_first(&mut records);
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.remove(id).is_some())
    }

    fn delete_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trip::{TripAccumulator, TripStatus};
    use crate::types::PositionFix;

    fn record(start_ms: i64) -> TripRecord {
        let mut trip = TripAccumulator::new(start_ms);
        trip.on_fix(&PositionFix::new(40.0, -73.0, start_ms, 5.0, Some(4.0)))
            .unwrap();
        trip.on_fix(&PositionFix::new(40.001, -73.0, start_ms + 10_000, 6.0, Some(4.0)))
            .unwrap();
        trip.finalize(start_ms + 20_000, TripStatus::Completed)
    }

    fn exercise(store: &dyn TripStore) {
        assert_eq!(store.count().unwrap(), 0);
        let a = record(1_000);
        let b = record(5_000);
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        // Saving again replaces
        store.save(&a).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        assert_eq!(store.get(&a.id).unwrap(), Some(a.clone()));
        assert_eq!(store.get("trip_42").unwrap(), None);

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);

        assert!(store.delete(&a.id).unwrap());
        assert!(!store.delete(&a.id).unwrap());
        assert_eq!(store.count().unwrap(), 1);

        store.delete_all().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryTripStore::new());
    }

    #[test]
    fn test_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTripStore::open(dir.path().join("trips")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let trip = record(7_000);
        JsonTripStore::open(dir.path()).unwrap().save(&trip).unwrap();

        let reopened = JsonTripStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&trip.id).unwrap(), Some(trip));
    }

    #[test]
    fn test_json_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTripStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get("../escape"),
            Err(TrackerError::Storage(_))
        ));
    }
}
