//! Command line.
//!
//! Besides the regular flags, ROS-style remapping arguments are accepted so
//! the binary can be launched by `rosrun`/`roslaunch` unchanged:
//! `_pip:=10.0.0.5` sets a private parameter and `__name:=my_pose` renames
//! the node.  They are split off before `clap` sees the argument list.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "naopose", version, about = "Put a NAO robot into a named body pose")]
pub struct Cli {
    /// IP/hostname of parent broker. Default is 127.0.0.1.
    #[arg(long, value_name = "IP")]
    pub pip: Option<String>,

    /// Port of parent broker. Default is 9559.
    #[arg(long, value_name = "PORT")]
    pub pport: Option<u16>,

    /// Pose to reach.
    #[arg(long, value_name = "NAME")]
    pub pose: Option<String>,

    /// Configuration file (default `~/.naopose/config.toml`).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// rosbridge WebSocket URL.
    #[arg(long, value_name = "URL")]
    pub rosbridge_url: Option<String>,

    /// Exit with status 3 when the pose goal does not succeed.
    #[arg(long)]
    pub require_goal_success: bool,
}

/// ROS remapping arguments found on the command line.
#[derive(Debug, Default, PartialEq)]
pub struct RosRemaps {
    /// `__name:=` override.
    pub node_name: Option<String>,
    /// `_key:=value` private parameters, values parsed as YAML-ish scalars.
    pub private_params: HashMap<String, Value>,
}

/// Split `args` into the list `clap` should parse and the ROS remaps.
pub fn split_ros_args<I>(args: I) -> (Vec<String>, RosRemaps)
where
    I: IntoIterator<Item = String>,
{
    let mut kept = Vec::new();
    let mut remaps = RosRemaps::default();

    for arg in args {
        let Some((key, value)) = arg.split_once(":=") else {
            kept.push(arg);
            continue;
        };
        if key == "__name" {
            remaps.node_name = Some(value.to_string());
        } else if let Some(param) = key.strip_prefix('_').filter(|k| !k.starts_with('_')) {
            remaps
                .private_params
                .insert(param.to_string(), scalar(value));
        }
        // Topic remaps (`from:=to`) and other `__` specials have no meaning here.
    }

    (kept, remaps)
}

/// Interpret a remap value the way `rosparam` would for simple scalars.
fn scalar(value: &str) -> Value {
    if let Ok(n) = value.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = value.parse::<f64>() {
        return Value::from(f);
    }
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(value),
    }
}
