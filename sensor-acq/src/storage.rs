//! On-disk store of detector calibrations.
//!
//! Calibrations are kept as JSON files named `<model>-<serial>.json` under a
//! root directory (`~/.sensor_cal/` by default). Spaces in the model name are
//! stored as underscores; dashes are reserved as the separator. Path
//! separators and leading dots are rejected so every key stays inside the root.

use std::path::{Path, PathBuf};

use crate::calibration_run::DetectorCalibration;
use crate::error::{AcquisitionError, AcquisitionResult};

#[derive(Debug, Clone)]
pub struct CalibrationStore {
    root_path: PathBuf,
}

impl CalibrationStore {
    /// Store rooted at `~/.sensor_cal`
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".sensor_cal"),
        })
    }

    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn filename(&self, model: &str, serial: &str) -> AcquisitionResult<PathBuf> {
        for part in [model, serial] {
            check_key_part(part)?;
        }
        let model_safe = model.replace(' ', "_");
        Ok(self.root_path.join(format!("{model_safe}-{serial}.json")))
    }

    /// Save a calibration, creating the root directory if needed.
    ///
    /// Returns the path written.
    pub fn save(
        &self,
        model: &str,
        serial: &str,
        calibration: &DetectorCalibration,
    ) -> AcquisitionResult<PathBuf> {
        let path = self.filename(model, serial)?;
        std::fs::create_dir_all(&self.root_path)?;
        calibration.save_to_file(&path)?;
        Ok(path)
    }

    /// Load the calibration for a camera.
    ///
    /// Returns `None` if none is stored, `Some(Err)` if the file exists but
    /// cannot be read.
    pub fn load(
        &self,
        model: &str,
        serial: &str,
    ) -> Option<AcquisitionResult<DetectorCalibration>> {
        let path = match self.filename(model, serial) {
            Ok(path) => path,
            Err(e) => return Some(Err(e)),
        };
        if !path.exists() {
            return None;
        }
        Some(DetectorCalibration::load_from_file(&path))
    }

    /// `(model, serial)` pairs with a stored calibration.
    pub fn list(&self) -> AcquisitionResult<Vec<(String, String)>> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let mut cameras = Vec::new();
        for entry in std::fs::read_dir(&self.root_path)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some((model, serial)) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| stem.split_once('-'))
            {
                cameras.push((model.replace('_', " "), serial.to_string()));
            }
        }
        cameras.sort();
        Ok(cameras)
    }

    /// Returns `Ok(false)` if nothing was stored for the camera.
    pub fn delete(&self, model: &str, serial: &str) -> AcquisitionResult<bool> {
        let path = self.filename(model, serial)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

/// A model or serial must name a single file under the store root.
fn check_key_part(part: &str) -> AcquisitionResult<()> {
    if part.is_empty() {
        return Err(AcquisitionError::InvalidArgument(
            "model and serial cannot be empty".to_string(),
        ));
    }
    if let Some(c) = part.chars().find(|&c| matches!(c, '-' | '/' | '\\' | '\0')) {
        return Err(AcquisitionError::InvalidArgument(format!(
            "model and serial cannot contain {c:?}: {part:?}"
        )));
    }
    if part.starts_with('.') {
        return Err(AcquisitionError::InvalidArgument(format!(
            "model and serial cannot start with '.': {part:?}"
        )));
    }
    Ok(())
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".sensor_cal")))
    }
}
