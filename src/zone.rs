//! Danger-zone storage.
//!
//! - `Zone`: a committed, validated polygon with a local id and a revision.
//! - `ZoneStore`: the single source of truth, shared between the processing
//!   loop and operator surfaces. Replacement is atomic: readers get either the
//!   previous `Arc<Zone>` or the new one, never a polygon under construction.
//! - `ZoneDraft`: points collected while the operator is drawing.
//! - `ZoneFile` / `ZoneFileWatcher`: JSON zone files and hot reload.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::SystemTime;

use crate::error::{HazardError, HazardResult};
use crate::geometry::{Point, Polygon};

pub const DEFAULT_ZONE_ID: &str = "zone:danger";

/// A zone id MUST be a short local identifier.
///
/// Allowed: "zone:danger", "zone:pier_a", "zone:cliff-edge"
/// Disallowed: whitespace, slashes, or punctuation outside [_-].
pub fn validate_zone_id(zone_id: &str) -> HazardResult<()> {
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^zone:[a-z0-9_-]{1,64}$").expect("zone id pattern compiles")
    });

    if !re.is_match(&zone_id.to_lowercase()) {
        return Err(HazardError::InvalidZone(format!(
            "zone id '{}' must match ^zone:[a-z0-9_-]{{1,64}}$",
            zone_id
        )));
    }
    Ok(())
}

/// A committed danger zone. Immutable; replaced wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    id: String,
    polygon: Polygon,
    revision: u64,
}

impl Zone {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    /// Store-assigned revision; strictly increasing per commit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, p: Point) -> bool {
        self.polygon.contains(p)
    }

    /// SHA-256 over the vertex coordinates, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for p in self.polygon.vertices() {
            hasher.update(p.x.to_le_bytes());
            hasher.update(p.y.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn to_file(&self) -> ZoneFile {
        ZoneFile {
            id: self.id.clone(),
            points: self.polygon.vertices().to_vec(),
        }
    }
}

/// Shared holder of the active zone.
///
/// Every commit or clear bumps the revision. Evaluators compare the revision
/// they last saw against `revision()` to know when to reset their state.
#[derive(Debug, Default)]
pub struct ZoneStore {
    current: RwLock<Option<Arc<Zone>>>,
    revision: AtomicU64,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and atomically replace the active zone.
    ///
    /// On `InvalidZone` the previous zone stays active.
    pub fn set_zone(&self, id: &str, points: Vec<Point>) -> HazardResult<Arc<Zone>> {
        validate_zone_id(id)?;
        let polygon = Polygon::new(points)?;

        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let zone = Arc::new(Zone {
            id: id.to_lowercase(),
            polygon,
            revision,
        });
        *guard = Some(zone.clone());
        log::info!(
            "zone {} committed: revision={} vertices={} fingerprint={}",
            zone.id,
            zone.revision,
            zone.polygon.len(),
            &zone.fingerprint()[..16]
        );
        Ok(zone)
    }

    /// Remove the active zone. Detection is skipped until a new one is set.
    pub fn clear_zone(&self) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            self.revision.fetch_add(1, Ordering::SeqCst);
            log::info!("zone cleared");
        }
    }

    pub fn get_zone(&self) -> Option<Arc<Zone>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Revision of the last commit or clear (0 before any).
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Snapshot of the zone together with the store revision it belongs to.
    pub fn snapshot(&self) -> (Option<Arc<Zone>>, u64) {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (guard.clone(), self.revision.load(Ordering::SeqCst))
    }

    pub fn load_file(&self, path: &Path) -> Result<Arc<Zone>> {
        let file = ZoneFile::read(path)?;
        self.set_zone(&file.id, file.points)
            .with_context(|| format!("zone file {}", path.display()))
    }
}

/// Points collected while the operator draws a zone.
///
/// Nothing reaches the store until `finish`.
#[derive(Clone, Debug, Default)]
pub struct ZoneDraft {
    points: Vec<Point>,
}

impl ZoneDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn undo(&mut self) -> Option<Point> {
        self.points.pop()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Commit the drawn polygon, replacing any prior zone.
    ///
    /// The draft is consumed only on success so the operator can keep editing.
    pub fn finish(&mut self, store: &ZoneStore, id: &str) -> HazardResult<Arc<Zone>> {
        let zone = store.set_zone(id, self.points.clone())?;
        self.points.clear();
        Ok(zone)
    }
}

/// On-disk zone description: `{"id": "zone:x", "points": [[x, y], ...]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneFile {
    #[serde(default = "default_zone_id")]
    pub id: String,
    pub points: Vec<Point>,
}

fn default_zone_id() -> String {
    DEFAULT_ZONE_ID.to_string()
}

impl ZoneFile {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read zone file {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid zone file {}: {}", path.display(), e))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        // Write-then-rename so a watcher never reads a half-written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("write zone file {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replace zone file {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> HazardResult<Polygon> {
        validate_zone_id(&self.id)?;
        Polygon::new(self.points.clone())
    }
}

/// Reloads a zone file into a store when its modification time changes.
pub struct ZoneFileWatcher {
    path: PathBuf,
    store: Arc<ZoneStore>,
    last_modified: Option<SystemTime>,
}

impl ZoneFileWatcher {
    pub fn new(path: impl Into<PathBuf>, store: Arc<ZoneStore>) -> Self {
        Self {
            path: path.into(),
            store,
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the file once. Returns the newly committed zone, if any.
    ///
    /// A missing or invalid file is logged and the current zone is kept.
    pub fn poll(&mut self) -> Option<Arc<Zone>> {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                log::debug!("zone file {} unavailable: {}", self.path.display(), err);
                return None;
            }
        };
        if self.last_modified == Some(modified) {
            return None;
        }
        self.last_modified = Some(modified);

        match self.store.load_file(&self.path) {
            Ok(zone) => Some(zone),
            Err(err) => {
                log::warn!("zone file rejected, keeping previous zone: {:#}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn zone_id_allowlist() {
        assert!(validate_zone_id("zone:pier_a").is_ok());
        assert!(validate_zone_id("ZONE:Cliff-Edge").is_ok());
        assert!(validate_zone_id("zone:").is_err());
        assert!(validate_zone_id("zone:has space").is_err());
        assert!(validate_zone_id("pier").is_err());
    }

    #[test]
    fn store_starts_empty() {
        let store = ZoneStore::new();
        assert!(store.get_zone().is_none());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn set_zone_replaces_and_bumps_revision() {
        let store = ZoneStore::new();
        let first = store.set_zone("zone:a", square()).unwrap();
        let second = store.set_zone("zone:b", square()).unwrap();
        assert_eq!(first.revision(), 1);
        assert_eq!(second.revision(), 2);
        assert_eq!(store.get_zone().unwrap().id(), "zone:b");
        // Readers holding the old Arc keep a complete polygon.
        assert_eq!(first.polygon().len(), 4);
    }

    #[test]
    fn invalid_zone_keeps_previous() {
        let store = ZoneStore::new();
        store.set_zone("zone:a", square()).unwrap();
        let err = store
            .set_zone("zone:b", vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, HazardError::InvalidZone(_)));
        let zone = store.get_zone().unwrap();
        assert_eq!(zone.id(), "zone:a");
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn clear_zone_bumps_revision_once() {
        let store = ZoneStore::new();
        store.set_zone("zone:a", square()).unwrap();
        store.clear_zone();
        store.clear_zone();
        assert!(store.get_zone().is_none());
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn draft_commits_only_on_finish() {
        let store = ZoneStore::new();
        let mut draft = ZoneDraft::new();
        draft.push(Point::new(0.0, 0.0));
        draft.push(Point::new(10.0, 0.0));
        assert!(draft.finish(&store, "zone:a").is_err());
        assert_eq!(draft.points().len(), 2);
        assert!(store.get_zone().is_none());

        draft.push(Point::new(99.0, 99.0));
        assert_eq!(draft.undo(), Some(Point::new(99.0, 99.0)));
        draft.push(Point::new(10.0, 10.0));
        let zone = draft.finish(&store, "zone:a").unwrap();
        assert!(draft.points().is_empty());
        assert!(zone.contains(Point::new(8.0, 2.0)));
    }

    #[test]
    fn fingerprint_tracks_geometry() {
        let store = ZoneStore::new();
        let a = store.set_zone("zone:a", square()).unwrap();
        let b = store.set_zone("zone:a", square()).unwrap();
        let mut moved = square();
        moved[2] = Point::new(12.0, 10.0);
        let c = store.set_zone("zone:a", moved).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn zone_file_round_trip_and_watch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("zone.json");
        let file = ZoneFile {
            id: "zone:pier".to_string(),
            points: square(),
        };
        file.write(&path)?;

        let store = Arc::new(ZoneStore::new());
        let mut watcher = ZoneFileWatcher::new(&path, store.clone());
        let zone = watcher.poll().expect("first poll loads the file");
        assert_eq!(zone.id(), "zone:pier");
        assert!(watcher.poll().is_none(), "unchanged file is not reloaded");
        assert_eq!(zone.to_file(), file);
        Ok(())
    }

    #[test]
    fn zone_file_defaults_id() {
        let file: ZoneFile =
            serde_json::from_str(r#"{"points": [[0,0],[4,0],[4,4]]}"#).unwrap();
        assert_eq!(file.id, DEFAULT_ZONE_ID);
        assert!(file.validate().is_ok());
    }
}
