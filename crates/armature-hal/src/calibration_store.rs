//! Calibration files: one pretty-printed JSON document per device id,
//! keyed by motor name.
//!
//! Default location is
//! `~/.armature/calibration/{robots,teleoperators}/<type>/<id>.json`;
//! `ARMATURE_CALIBRATION_DIR` replaces `~/.armature/calibration`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use armature_types::RobotError;

use crate::motors::Calibration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Robot,
    Teleoperator,
}

impl DeviceKind {
    fn dir_name(self) -> &'static str {
        match self {
            DeviceKind::Robot => "robots",
            DeviceKind::Teleoperator => "teleoperators",
        }
    }
}

/// Default calibration directory for devices of `type_name`.
pub fn default_calibration_dir(kind: DeviceKind, type_name: &str) -> PathBuf {
    if let Ok(root) = std::env::var("ARMATURE_CALIBRATION_DIR") {
        return PathBuf::from(root).join(kind.dir_name()).join(type_name);
    }
    calibration_dir_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
        kind,
        type_name,
    )
}

pub(crate) fn calibration_dir_for_home(home: &str, kind: DeviceKind, type_name: &str) -> PathBuf {
    PathBuf::from(home)
        .join(".armature")
        .join("calibration")
        .join(kind.dir_name())
        .join(type_name)
}

/// Reads and writes calibration files in one directory.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load the calibration for `id`.  Returns `None` if no file exists.
    pub fn load(&self, id: &str) -> Result<Option<Calibration>, RobotError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| RobotError::Io(format!("failed to read {}: {e}", path.display())))?;
        let cal = serde_json::from_str(&raw).map_err(|e| {
            RobotError::Serialization(format!("failed to parse {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "calibration loaded");
        Ok(Some(cal))
    }

    /// Write the calibration for `id`, creating the directory if needed.
    pub fn save(&self, id: &str, calibration: &Calibration) -> Result<PathBuf, RobotError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            RobotError::Io(format!("failed to create {}: {e}", self.dir.display()))
        })?;
        let path = self.path_for(id);
        let raw = serde_json::to_string_pretty(calibration)
            .map_err(|e| RobotError::Serialization(e.to_string()))?;
        fs::write(&path, raw)
            .map_err(|e| RobotError::Io(format!("failed to write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "calibration saved");
        Ok(path)
    }
}
