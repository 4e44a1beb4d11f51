//! Configuration vault – reads `~/.naopose/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `NAOPOSE_*`
//! environment variables, command-line flags.  The broker address from the
//! file and environment is handed to the node as its `~pip` / `~pport`
//! private parameters; command-line `--pip` / `--pport` override those.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use naopose_middleware::DEFAULT_ROSBRIDGE_URL;
use naopose_runtime::NodeConfig;
use naopose_types::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// NAOqi broker host (`~pip`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pip: Option<String>,

    /// NAOqi broker port (`~pport`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pport: Option<u16>,

    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_pose_name")]
    pub pose_name: String,

    #[serde(default = "default_action_endpoint")]
    pub action_endpoint: String,

    /// `rosbridge_server` WebSocket URL.
    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: f64,

    #[serde(default = "default_goal_timeout_secs")]
    pub goal_timeout_secs: f64,

    /// Exit non-zero when the pose goal does not succeed.
    #[serde(default)]
    pub require_goal_success: bool,
}

fn default_node_name() -> String {
    "naoqi_pose".to_string()
}
fn default_pose_name() -> String {
    "crouch".to_string()
}
fn default_action_endpoint() -> String {
    "body_pose".to_string()
}
fn default_rosbridge_url() -> String {
    DEFAULT_ROSBRIDGE_URL.to_string()
}
fn default_server_timeout_secs() -> f64 {
    3.0
}
fn default_goal_timeout_secs() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pip: None,
            pport: None,
            node_name: default_node_name(),
            pose_name: default_pose_name(),
            action_endpoint: default_action_endpoint(),
            rosbridge_url: default_rosbridge_url(),
            server_timeout_secs: default_server_timeout_secs(),
            goal_timeout_secs: default_goal_timeout_secs(),
            require_goal_success: false,
        }
    }
}

impl Config {
    /// Private parameters for the node context.
    pub fn private_params(&self) -> HashMap<String, Value> {
        let mut params = HashMap::new();
        if let Some(pip) = &self.pip {
            params.insert("pip".to_string(), Value::from(pip.as_str()));
        }
        if let Some(pport) = self.pport {
            params.insert("pport".to_string(), Value::from(pport));
        }
        params
    }

    /// Pose-flow settings for the node.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for negative or non-finite timeouts.
    pub fn node_config(&self) -> Result<NodeConfig, BridgeError> {
        Ok(NodeConfig {
            pose_name: self.pose_name.clone(),
            action_endpoint: self.action_endpoint.clone(),
            server_timeout: secs("server_timeout_secs", self.server_timeout_secs)?,
            goal_timeout: secs("goal_timeout_secs", self.goal_timeout_secs)?,
            require_goal_success: self.require_goal_success,
        })
    }
}

fn secs(field: &str, value: f64) -> Result<Duration, BridgeError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| BridgeError::Config(format!("{field} = {value}: {e}")))
}

/// Return the path to `~/.naopose/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".naopose").join("config.toml")
}

/// Load the config from `path`, or from the default location.
///
/// A missing file yields the defaults.  Environment overrides are applied
/// either way.
pub fn load(path: Option<&Path>) -> Result<Config, BridgeError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = load_from(&path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `NAOPOSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `NAOPOSE_PIP` | `pip` |
/// | `NAOPOSE_PPORT` | `pport` |
/// | `NAOPOSE_POSE` | `pose_name` |
/// | `NAOPOSE_ROSBRIDGE_URL` | `rosbridge_url` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("NAOPOSE_PIP") {
        cfg.pip = Some(v);
    }
    if let Ok(v) = std::env::var("NAOPOSE_PPORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.pport = Some(port);
    }
    if let Ok(v) = std::env::var("NAOPOSE_POSE") {
        cfg.pose_name = v;
    }
    if let Ok(v) = std::env::var("NAOPOSE_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify that the defaults describe the crouch flow on a local robot.
    #[test]
    fn defaults_match_the_pose_flow() {
        let cfg = Config::default();
        assert_eq!(cfg.node_name, "naoqi_pose");
        assert_eq!(cfg.pose_name, "crouch");
        assert_eq!(cfg.action_endpoint, "body_pose");
        assert_eq!(cfg.rosbridge_url, "ws://127.0.0.1:9090");
        assert!(cfg.private_params().is_empty());

        let node = cfg.node_config().unwrap();
        assert_eq!(node.server_timeout, Duration::from_secs(3));
        assert_eq!(node.goal_timeout, Duration::from_secs(5));
    }

    /// Verify that a config file with only some keys falls back to defaults
    /// for the rest.
    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "pip = \"nao.local\"\npport = 9600\nrequire_goal_success = true\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.pip.as_deref(), Some("nao.local"));
        assert_eq!(cfg.pport, Some(9600));
        assert!(cfg.require_goal_success);
        assert_eq!(cfg.pose_name, "crouch");

        let params = cfg.private_params();
        assert_eq!(params["pip"], Value::from("nao.local"));
        assert_eq!(params["pport"], Value::from(9600));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    /// Verify that a value of the wrong type is reported as a config error.
    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "pport = \"not a port\"").unwrap();
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let cfg = Config {
            goal_timeout_secs: -1.0,
            ..Config::default()
        };
        assert!(matches!(cfg.node_config(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn config_path_points_to_naopose_dir() {
        let p = config_path_for_home("/home/nao");
        assert!(p.to_string_lossy().contains(".naopose"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    /// Verify that `NAOPOSE_*` variables override the file, and that an
    /// unparsable port is ignored.
    #[test]
    fn apply_env_overrides_changes_broker_and_pose() {
        // SAFETY: the only test in this crate touching these variables.
        unsafe {
            std::env::set_var("NAOPOSE_PIP", "192.168.1.12");
            std::env::set_var("NAOPOSE_PPORT", "not-a-port");
            std::env::set_var("NAOPOSE_POSE", "stand");
        }
        let mut cfg = Config {
            pport: Some(9600),
            ..Config::default()
        };
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("NAOPOSE_PIP");
            std::env::remove_var("NAOPOSE_PPORT");
            std::env::remove_var("NAOPOSE_POSE");
        }

        assert_eq!(cfg.pip.as_deref(), Some("192.168.1.12"));
        assert_eq!(cfg.pport, Some(9600));
        assert_eq!(cfg.pose_name, "stand");
    }
}
