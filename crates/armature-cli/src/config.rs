//! Workbench configuration – reads/writes `~/.armature/config.toml`.
//!
//! ```toml
//! fps = 30
//!
//! [robot]
//! type = "so_follower"
//! port = "sim://follower"
//!
//! [teleop]
//! type = "so_leader"
//! port = "sim://leader"
//! ```
//!
//! Every key besides `type` is handed unchanged to the integration named by
//! `type`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use armature_hal::DeviceConfig;
use armature_hal::so_arm::{SO_FOLLOWER, SO_LEADER};

/// Persisted user configuration stored in `~/.armature/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Teleoperation loop rate.
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Stop `/teleop` after this many seconds; runs until Ctrl-C when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teleop_time_s: Option<f64>,

    #[serde(default = "default_robot")]
    pub robot: DeviceConfig,

    #[serde(default = "default_teleop")]
    pub teleop: DeviceConfig,
}

fn default_fps() -> u32 {
    60
}

fn sim_device(kind: &str, port: &str) -> DeviceConfig {
    let mut params = serde_json::Map::new();
    params.insert("port".to_string(), port.into());
    DeviceConfig {
        kind: kind.to_string(),
        params,
    }
}

fn default_robot() -> DeviceConfig {
    sim_device(SO_FOLLOWER, "sim://follower")
}

fn default_teleop() -> DeviceConfig {
    sim_device(SO_LEADER, "sim://leader")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            teleop_time_s: None,
            robot: default_robot(),
            teleop: default_teleop(),
        }
    }
}

/// Return the path to `~/.armature/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armature").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARMATURE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMATURE_FPS` | `fps` |
/// | `ARMATURE_ROBOT_PORT` | `robot.port` |
/// | `ARMATURE_TELEOP_PORT` | `teleop.port` |
/// | `ARMATURE_ROBOT_ID` | `robot.id` |
/// | `ARMATURE_TELEOP_ID` | `teleop.id` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMATURE_FPS")
        && let Ok(fps) = v.parse::<u32>()
        && fps > 0
    {
        cfg.fps = fps;
    }
    override_param(&mut cfg.robot, "port", "ARMATURE_ROBOT_PORT");
    override_param(&mut cfg.robot, "id", "ARMATURE_ROBOT_ID");
    override_param(&mut cfg.teleop, "port", "ARMATURE_TELEOP_PORT");
    override_param(&mut cfg.teleop, "id", "ARMATURE_TELEOP_ID");
}

fn override_param(device: &mut DeviceConfig, key: &str, var: &str) {
    if let Ok(v) = std::env::var(var) {
        device.params.insert(key.to_string(), v.into());
    }
}

/// Save the config to disk, creating `~/.armature/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
