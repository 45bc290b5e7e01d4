//! Device configuration.
//!
//! A [`DeviceConfig`] is a `type` tag plus free-form parameters, so config
//! files can name integrations the core crate has never heard of.  Each
//! constructor registered with the
//! [`HardwareRegistry`][crate::registry::HardwareRegistry] parses the
//! parameters into its own typed config (e.g. [`SoFollowerConfig`]).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use armature_types::RobotError;

use crate::camera::CameraConfig;
use crate::so_arm::so_motors;

/// `type`-tagged configuration of a robot or teleoperator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl DeviceConfig {
    /// Build a config from a typed parameter struct.
    pub fn new(kind: impl Into<String>, params: &impl Serialize) -> Result<Self, RobotError> {
        let value = serde_json::to_value(params).map_err(|e| RobotError::Serialization(e.to_string()))?;
        let serde_json::Value::Object(mut params) = value else {
            return Err(RobotError::Config("device parameters must be a table".to_string()));
        };
        params.retain(|_, v| !v.is_null());
        Ok(Self {
            kind: kind.into(),
            params,
        })
    }

    /// Parse the parameters into the integration's typed config.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, RobotError> {
        serde_json::from_value(serde_json::Value::Object(self.params.clone()))
            .map_err(|e| RobotError::Config(format!("invalid '{}' config: {e}", self.kind)))
    }
}

fn default_id() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// Parameters of the six-joint SO follower arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoFollowerConfig {
    #[serde(default = "default_id")]
    pub id: String,

    /// Bus address, `scheme://path`, e.g. `"sim://follower"`.
    pub port: String,

    /// Overrides the default calibration directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_dir: Option<PathBuf>,

    /// Largest per-step change of a goal position, in normalized units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_relative_target: Option<f64>,

    /// Report body joints in degrees instead of `-100..=100`.
    #[serde(default)]
    pub use_degrees: bool,

    #[serde(default = "default_true")]
    pub disable_torque_on_disconnect: bool,

    #[serde(default)]
    pub cameras: BTreeMap<String, CameraConfig>,
}

impl SoFollowerConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            id: default_id(),
            port: port.into(),
            calibration_dir: None,
            max_relative_target: None,
            use_degrees: false,
            disable_torque_on_disconnect: true,
            cameras: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), RobotError> {
        validate_common(&self.id, &self.port)?;
        if let Some(max) = self.max_relative_target
            && !(max.is_finite() && max > 0.0)
        {
            return Err(RobotError::Config(format!(
                "max_relative_target must be positive, got {max}"
            )));
        }
        if self.cameras.keys().any(|name| name.trim().is_empty()) {
            return Err(RobotError::Config("camera names must not be empty".to_string()));
        }
        let motors = so_motors(self.use_degrees);
        if let Some(name) = self
            .cameras
            .keys()
            .find(|name| name.strip_suffix(".pos").is_some_and(|m| motors.contains_key(m)))
        {
            return Err(RobotError::Config(format!(
                "camera name '{name}' collides with a joint position feature"
            )));
        }
        Ok(())
    }
}

/// Parameters of the SO leader arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoLeaderConfig {
    #[serde(default = "default_id")]
    pub id: String,

    pub port: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_dir: Option<PathBuf>,

    #[serde(default)]
    pub use_degrees: bool,
}

impl SoLeaderConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            id: default_id(),
            port: port.into(),
            calibration_dir: None,
            use_degrees: false,
        }
    }

    pub fn validate(&self) -> Result<(), RobotError> {
        validate_common(&self.id, &self.port)
    }
}

fn validate_common(id: &str, port: &str) -> Result<(), RobotError> {
    if id.trim().is_empty() {
        return Err(RobotError::Config("id must not be empty".to_string()));
    }
    if id.contains(['/', '\\']) {
        return Err(RobotError::Config(format!("id '{id}' must not contain path separators")));
    }
    if port.trim().is_empty() {
        return Err(RobotError::Config("port must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_parses_from_toml() {
        let raw = r#"
            type = "so_follower"
            id = "blue"
            port = "sim://follower"
            max_relative_target = 5.0

            [cameras.front]
            type = "sim"
            width = 64
            height = 48
        "#;
        let cfg: DeviceConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.kind, "so_follower");

        let follower: SoFollowerConfig = cfg.parse().unwrap();
        assert_eq!(follower.id, "blue");
        assert_eq!(follower.max_relative_target, Some(5.0));
        assert!(follower.disable_torque_on_disconnect);
        assert_eq!(follower.cameras["front"].shape(), [48, 64, 3]);
        follower.validate().unwrap();
    }

    #[test]
    fn device_config_from_typed_params_drops_nulls() {
        let cfg = DeviceConfig::new("so_leader", &SoLeaderConfig::new("sim://leader")).unwrap();
        assert!(!cfg.params.contains_key("calibration_dir"));
        let back: SoLeaderConfig = cfg.parse().unwrap();
        assert_eq!(back.port, "sim://leader");
        assert_eq!(back.id, "default");
    }

    #[test]
    fn parse_reports_missing_fields() {
        let cfg: DeviceConfig = toml::from_str(r#"type = "so_follower""#).unwrap();
        let err = cfg.parse::<SoFollowerConfig>().unwrap_err();
        assert!(matches!(err, RobotError::Config(msg) if msg.contains("port")));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = SoFollowerConfig::new("sim://follower");
        cfg.max_relative_target = Some(0.0);
        assert!(cfg.validate().is_err());

        let mut cfg = SoFollowerConfig::new("sim://follower");
        cfg.id = "../escape".to_string();
        assert!(cfg.validate().is_err());

        assert!(SoLeaderConfig::new(" ").validate().is_err());
    }

    #[test]
    fn camera_named_like_a_joint_is_rejected() {
        let mut cfg = SoFollowerConfig::new("sim://follower");
        cfg.cameras.insert("gripper.pos".to_string(), CameraConfig::sim(8, 6));
        assert!(matches!(cfg.validate(), Err(RobotError::Config(msg)) if msg.contains("gripper.pos")));

        let mut cfg = SoFollowerConfig::new("sim://follower");
        cfg.cameras.insert("gripper".to_string(), CameraConfig::sim(8, 6));
        cfg.validate().unwrap();
    }
}
