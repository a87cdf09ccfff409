use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use semver::Version;

/// Sentinel distinguishing complete installs from partial ones. Written
/// strictly after every file of the entry is in place.
pub const READY_MARKER: &str = ".ready";
const LAST_KNOWN_GOOD: &str = "lastKnownGood.json";

/// The on-disk cache under `COREPACK_HOME`:
///
/// ```text
/// <home>/
///   lastKnownGood.json
///   <tool>/<exact-version>/...tool files...
///   <tool>/<exact-version>/.ready
/// ```
///
/// Construction performs no writes; read paths tolerate a read-only root.
pub struct Cache {
    home: PathBuf,
}

/// A fully installed tool version.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

impl Cache {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Cache { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn tool_dir(&self, name: &str) -> PathBuf {
        self.home.join(name)
    }

    pub fn entry_dir(&self, name: &str, version: &str) -> PathBuf {
        self.tool_dir(name).join(version)
    }

    /// Returns the entry only when its ready marker exists.
    pub fn find_entry(&self, name: &str, version: &str) -> Option<CacheEntry> {
        let path = self.entry_dir(name, version);
        if path.join(READY_MARKER).exists() {
            Some(CacheEntry {
                name: name.to_string(),
                version: version.to_string(),
                path,
            })
        } else {
            None
        }
    }

    /// Moves a fully extracted temp directory into its final location.
    ///
    /// Any number of installers may race on the same entry: the rename
    /// winner writes the ready marker, losers discard their temp and wait
    /// for the winner's marker. Either way the caller ends up with a
    /// usable entry.
    pub fn commit(&self, temp: &Path, name: &str, version: &str) -> Result<CacheEntry> {
        let dest = self.entry_dir(name, version);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        match std::fs::rename(temp, &dest) {
            Ok(()) => {
                std::fs::write(dest.join(READY_MARKER), b"")
                    .with_context(|| format!("failed to mark {} ready", dest.display()))?;
            }
            Err(_) if dest.exists() => {
                let _ = std::fs::remove_dir_all(temp);
                let marker = dest.join(READY_MARKER);
                let deadline = Instant::now() + Duration::from_secs(10);
                while !marker.exists() {
                    if Instant::now() >= deadline {
                        bail!("timed out waiting for {} to become ready", dest.display());
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to install into {}", dest.display()));
            }
        }
        Ok(CacheEntry {
            name: name.to_string(),
            version: version.to_string(),
            path: dest,
        })
    }

    /// Reads the global pins. Malformed or unreadable files degrade to an
    /// empty map; a broken pin file must never break a run.
    pub fn load_last_known_good(&self) -> BTreeMap<String, String> {
        std::fs::read_to_string(self.home.join(LAST_KNOWN_GOOD))
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Atomically replaces the pin file. Best effort: a read-only cache
    /// root degrades to not persisting the pin.
    pub fn save_last_known_good(&self, pins: &BTreeMap<String, String>) {
        if std::fs::create_dir_all(&self.home).is_err() {
            return;
        }
        let Ok(json) = serde_json::to_string_pretty(pins) else {
            return;
        };
        let Ok(mut file) = tempfile::NamedTempFile::new_in(&self.home) else {
            return;
        };
        if file.write_all(json.as_bytes()).is_err() {
            return;
        }
        let _ = file.persist(self.home.join(LAST_KNOWN_GOOD));
    }

    /// Records a successful run. A pin never moves across a major
    /// boundary, and pseudo-versions (custom URL installs) are not
    /// pinned at all.
    pub fn update_last_known_good(&self, name: &str, version: &str) {
        let Ok(next) = Version::parse(version) else {
            return;
        };
        let mut pins = self.load_last_known_good();
        if let Some(previous) = pins.get(name) {
            if let Ok(prev) = Version::parse(previous) {
                if prev.major != next.major {
                    return;
                }
            }
        }
        pins.insert(name.to_string(), version.to_string());
        self.save_last_known_good(&pins);
    }

    /// Empties the cache root and recreates it.
    pub fn clean(&self) -> Result<()> {
        if self.home.exists() {
            std::fs::remove_dir_all(&self.home)
                .with_context(|| format!("failed to remove {}", self.home.display()))?;
        }
        std::fs::create_dir_all(&self.home)
            .with_context(|| format!("failed to create {}", self.home.display()))?;
        Ok(())
    }
}
