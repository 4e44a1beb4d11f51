//! `naopose` – put a NAO robot into a named body pose.
//!
//! 1. Initialises tracing (stderr, optional OTLP export).
//! 2. Resolves configuration: `~/.naopose/config.toml`, `NAOPOSE_*`
//!    variables, ROS remaps (`_pip:=`, `__name:=`) and flags.
//! 3. Registers the node, spawns the worker and spins until shutdown.
//! 4. Exits with the worker's outcome: 0 completed, 1 NAOqi unreachable,
//!    2 action server unavailable, 3 goal failed (strict mode), 130
//!    interrupted.

mod args;
mod config;

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing::{error, warn};

use naopose_middleware::{Context, RosbridgeActionFactory, WsModuleConnector};
use naopose_runtime::{ConnectionOverrides, NaoqiNode, init_tracing};
use naopose_types::{BridgeError, RunOutcome};

use crate::args::{Cli, RosRemaps, split_ros_args};
use crate::config::Config;

fn main() {
    let code = {
        let _guard = init_tracing("naopose");

        let (argv, remaps) = split_ros_args(std::env::args());
        let cli = Cli::parse_from(argv);

        match run(cli, remaps) {
            Ok(outcome) => {
                report(outcome);
                outcome.exit_code()
            }
            Err(e) => {
                error!(error = %e, "startup failed");
                eprintln!("{}: {e}", "error".red().bold());
                1
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli, remaps: RosRemaps) -> Result<RunOutcome, BridgeError> {
    let cfg = resolve_config(&cli, &remaps)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Config(format!("tokio runtime: {e}")))?;

    runtime.block_on(run_node(cfg, &cli, remaps))
}

/// Layer flags and ROS remaps on top of the file + environment config.
fn resolve_config(cli: &Cli, remaps: &RosRemaps) -> Result<Config, BridgeError> {
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(name) = &remaps.node_name {
        cfg.node_name = name.clone();
    }
    if let Some(pose) = &cli.pose {
        cfg.pose_name = pose.clone();
    }
    if let Some(url) = &cli.rosbridge_url {
        cfg.rosbridge_url = url.clone();
    }
    if cli.require_goal_success {
        cfg.require_goal_success = true;
    }
    Ok(cfg)
}

async fn run_node(cfg: Config, cli: &Cli, remaps: RosRemaps) -> Result<RunOutcome, BridgeError> {
    // `_key:=value` remaps win over the file and environment.
    let mut params = cfg.private_params();
    params.extend(remaps.private_params);

    let ctx = Context::init(&cfg.node_name, params)?;

    let ctx_ctrlc = ctx.clone();
    if let Err(e) = ctrlc::set_handler(move || ctx_ctrlc.signal_shutdown("interrupted")) {
        warn!(
            error = %e,
            "failed to install Ctrl-C handler; interrupting will not shut down cleanly"
        );
    }

    let node = NaoqiNode::init(
        ctx.clone(),
        ConnectionOverrides {
            host: cli.pip.clone(),
            port: cli.pport,
        },
        Arc::new(WsModuleConnector::default()),
        Arc::new(RosbridgeActionFactory::new(cfg.rosbridge_url.as_str(), cfg.node_name.as_str())),
        cfg.node_config()?,
    );

    node.start().await;
    ctx.spin().await;

    Ok(node.outcome().unwrap_or(RunOutcome::Cancelled))
}

fn report(outcome: RunOutcome) {
    let line = match outcome {
        RunOutcome::Completed => "pose sequence completed".green(),
        RunOutcome::VersionUnavailable => "NAOqi is unreachable".red(),
        RunOutcome::ActionServerUnavailable => "body pose action server unavailable".red(),
        RunOutcome::GoalFailed(state) => format!("pose goal ended in {state}").red(),
        RunOutcome::Cancelled => "interrupted".yellow(),
    };
    eprintln!("  {} {line}", "naopose:".bold());
}
