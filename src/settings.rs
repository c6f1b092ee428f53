use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::pairing::PairingConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("headcount.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestSettings {
    pub dir_x: PathBuf,
    pub dir_y: PathBuf,
    pub poll_interval_ms: u64,
    /// Lowercase, without the leading dot.
    pub extensions: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            dir_x: PathBuf::from("input_x"),
            dir_y: PathBuf::from("input_y"),
            poll_interval_ms: 500,
            extensions: default_extensions(),
        }
    }
}

impl IngestSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchSettings {
    pub data_dir: PathBuf,
    pub max_items: Option<usize>,
    pub randomize: bool,
    /// Empty means every classification directory.
    pub classifications: Vec<String>,
    pub item_pause_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("test_data"),
            max_items: None,
            randomize: true,
            classifications: Vec::new(),
            item_pause_ms: 50,
        }
    }
}

impl BatchSettings {
    pub fn item_pause(&self) -> Duration {
        Duration::from_millis(self.item_pause_ms)
    }
}

/// Optional CSV copies of what the database stores. Unset paths are not written.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    pub results_csv: Option<PathBuf>,
    pub runs_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorBackend {
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        model_version: Option<String>,
    },
}

impl Default for DetectorBackend {
    fn default() -> Self {
        DetectorBackend::Command {
            program: PathBuf::from("headcount-detector"),
            args: Vec::new(),
            model_version: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorSettings {
    pub backend: DetectorBackend,
    pub target_label: String,
    pub confidence_threshold: f64,
    pub uncertain_below: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::default(),
            target_label: "person".into(),
            confidence_threshold: 0.5,
            uncertain_below: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub ingest: IngestSettings,
    pub batch: BatchSettings,
    pub pairing: PairingConfig,
    pub detector: DetectorSettings,
    pub export: ExportSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        check_unit("detector.confidence_threshold", self.detector.confidence_threshold)?;
        check_unit("detector.uncertain_below", self.detector.uncertain_below)?;
        check_unit("pairing.confidence_threshold", self.pairing.confidence_threshold)?;

        if self.ingest.dir_x == self.ingest.dir_y {
            bail!(
                "ingest.dir_x and ingest.dir_y must differ (both are {})",
                self.ingest.dir_x.display()
            );
        }
        if self.ingest.poll_interval_ms == 0 {
            bail!("ingest.poll_interval_ms must be positive");
        }
        if self.ingest.extensions.is_empty() {
            bail!("ingest.extensions must name at least one extension");
        }
        if self.pairing.interval_secs == 0 {
            bail!("pairing.interval_secs must be positive");
        }
        if !(self.pairing.max_time_diff_secs.is_finite() && self.pairing.max_time_diff_secs > 0.0) {
            bail!("pairing.max_time_diff_secs must be positive");
        }
        if self.pairing.limit == 0 {
            bail!("pairing.limit must be positive");
        }
        if self.batch.max_items == Some(0) {
            bail!("batch.max_items must be positive when set");
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{name} must be within [0, 1], got {value}");
    }
    Ok(())
}

/// Settings backed by a JSON file. A missing file means defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Result<Settings> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.clone())
    }

    /// Applies `edit`, validates the result and writes it to disk.
    pub fn update(&self, edit: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        let mut next = guard.clone();
        edit(&mut next);
        next.validate()?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("headcount.json")).unwrap();
        let settings = store.settings().unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ingest.poll_interval_ms, 500);
        assert_eq!(settings.pairing.max_time_diff_secs, 5.0);
        assert_eq!(settings.pairing.confidence_threshold, 0.5);
        assert_eq!(settings.pairing.limit, 100);
        assert_eq!(settings.batch.item_pause_ms, 50);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("headcount.json");
        fs::write(
            &path,
            r#"{
                "ingest": { "dir_x": "/srv/cam-north" },
                "detector": { "backend": { "kind": "command", "program": "/opt/detect", "args": ["--cpu"] } }
            }"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).unwrap().settings().unwrap();
        assert_eq!(settings.ingest.dir_x, PathBuf::from("/srv/cam-north"));
        assert_eq!(settings.ingest.dir_y, PathBuf::from("input_y"));
        assert_eq!(settings.ingest.extensions, default_extensions());
        assert_eq!(
            settings.detector.backend,
            DetectorBackend::Command {
                program: PathBuf::from("/opt/detect"),
                args: vec!["--cpu".into()],
                model_version: None,
            }
        );
        assert_eq!(settings.detector.target_label, "person");
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("headcount.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(SettingsStore::new(path).is_err());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("headcount.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update(|s| {
                s.pairing.limit = 25;
                s.batch.randomize = false;
            })
            .unwrap();

        let reloaded = SettingsStore::new(path).unwrap().settings().unwrap();
        assert_eq!(reloaded.pairing.limit, 25);
        assert!(!reloaded.batch.randomize);
    }

    #[test]
    fn invalid_update_is_rejected_and_not_applied() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("headcount.json")).unwrap();

        let result = store.update(|s| s.pairing.confidence_threshold = 1.5);
        assert!(result.is_err());
        assert_eq!(store.settings().unwrap().pairing.confidence_threshold, 0.5);
        assert!(!store.path().exists());
    }

    #[test]
    fn validation_rejects_shared_input_directory() {
        let mut settings = Settings::default();
        settings.ingest.dir_y = settings.ingest.dir_x.clone();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_intervals() {
        let mut settings = Settings::default();
        settings.ingest.poll_interval_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pairing.interval_secs = 0;
        assert!(settings.validate().is_err());
    }
}
