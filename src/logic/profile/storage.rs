//! Profile persistence
//!
//! The user table is a small CSV (`id,name,height,weight,threshold`).
//! Every write rewrites the table through a temp file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::UserProfile;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ProfileError {
    Io(std::io::Error),
    Csv(csv::Error),
    NotFound(i64),
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::Io(e) => write!(f, "Profile IO error: {}", e),
            ProfileError::Csv(e) => write!(f, "Profile table error: {}", e),
            ProfileError::NotFound(id) => write!(f, "Profile {} not found", id),
        }
    }
}

impl std::error::Error for ProfileError {}

impl From<std::io::Error> for ProfileError {
    fn from(e: std::io::Error) -> Self {
        ProfileError::Io(e)
    }
}

impl From<csv::Error> for ProfileError {
    fn from(e: csv::Error) -> Self {
        ProfileError::Csv(e)
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Persistent user table
pub trait ProfileStore: Send + Sync {
    fn get(&self, id: i64) -> Result<Option<UserProfile>, ProfileError>;

    /// Insert or replace a whole profile
    fn upsert(&self, profile: &UserProfile) -> Result<(), ProfileError>;

    /// Persist a new threshold for an existing profile
    fn save_threshold(&self, id: i64, threshold: f64) -> Result<(), ProfileError>;
}

// ============================================================================
// CSV STORE
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ProfileRow {
    id: i64,
    name: String,
    height: Option<f64>,
    weight: Option<f64>,
    threshold: Option<f64>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            id: row.id,
            name: row.name,
            height_cm: row.height,
            weight_kg: row.weight,
            threshold: row.threshold,
        }
    }
}

impl From<&UserProfile> for ProfileRow {
    fn from(p: &UserProfile) -> Self {
        ProfileRow {
            id: p.id,
            name: p.name.clone(),
            height: p.height_cm,
            weight: p.weight_kg,
            threshold: p.threshold,
        }
    }
}

pub struct CsvProfileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl CsvProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<i64, UserProfile>, ProfileError> {
        let mut profiles = BTreeMap::new();
        if !self.path.exists() {
            return Ok(profiles);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        for row in reader.deserialize::<ProfileRow>() {
            let profile = UserProfile::from(row?);
            profiles.insert(profile.id, profile);
        }
        Ok(profiles)
    }

    fn write_all(&self, profiles: &BTreeMap<i64, UserProfile>) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for profile in profiles.values() {
                writer.serialize(ProfileRow::from(profile))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ProfileStore for CsvProfileStore {
    fn get(&self, id: i64) -> Result<Option<UserProfile>, ProfileError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(&id))
    }

    fn upsert(&self, profile: &UserProfile) -> Result<(), ProfileError> {
        let _guard = self.lock.lock();
        let mut profiles = self.read_all()?;
        profiles.insert(profile.id, profile.clone());
        self.write_all(&profiles)
    }

    fn save_threshold(&self, id: i64, threshold: f64) -> Result<(), ProfileError> {
        let _guard = self.lock.lock();
        let mut profiles = self.read_all()?;
        let profile = profiles.get_mut(&id).ok_or(ProfileError::NotFound(id))?;
        profile.threshold = Some(threshold);
        self.write_all(&profiles)?;
        log::info!("Saved threshold {:.1} for profile {}", threshold, id);
        Ok(())
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Non-persistent store (replays, tests)
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<BTreeMap<i64, UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: UserProfile) -> Self {
        let store = Self::new();
        store.profiles.lock().insert(profile.id, profile);
        store
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, id: i64) -> Result<Option<UserProfile>, ProfileError> {
        Ok(self.profiles.lock().get(&id).cloned())
    }

    fn upsert(&self, profile: &UserProfile) -> Result<(), ProfileError> {
        self.profiles.lock().insert(profile.id, profile.clone());
        Ok(())
    }

    fn save_threshold(&self, id: i64, threshold: f64) -> Result<(), ProfileError> {
        let mut profiles = self.profiles.lock();
        let profile = profiles.get_mut(&id).ok_or(ProfileError::NotFound(id))?;
        profile.threshold = Some(threshold);
        Ok(())
    }
}
