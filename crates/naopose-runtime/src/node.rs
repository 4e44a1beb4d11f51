//! [`NaoqiNode`] – the pose bridge node.
//!
//! Owns the connection parameters, the [`ProxyRegistry`], the memoised
//! NAOqi version and the single worker task.  The worker runs a two-step
//! sequence:
//!
//! 1. **Version** – query `ALMemory.version()` once and cache it.
//! 2. **Pose** – send a `BodyPose` goal to the `body_pose` action server and
//!    wait for it to finish.
//!
//! The worker never terminates the process.  It returns a [`RunOutcome`],
//! signals shutdown on the [`Context`], and leaves the exit status to the
//! binary.
//!
//! # Shutdown
//!
//! [`NaoqiNode::init`] registers [`NaoqiNode::on_shutdown`] as a context
//! hook.  The hook cancels the worker's token, waits for the worker to
//! return, then releases every proxy.  Every blocking step of the worker
//! races the token, so an unresponsive broker or action server cannot stall
//! shutdown.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use naopose_middleware::{
    ActionClientFactory, Context, MEMORY_MODULE, ModuleConnector, ModuleProxy,
};
use naopose_types::{
    BodyPoseGoal, BridgeError, ConnectionParams, DEFAULT_HOST, DEFAULT_PORT, GoalState,
    NaoqiVersion, RunOutcome,
};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::proxy_registry::ProxyRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Pose-flow settings.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name of the pose to reach, e.g. `"crouch"`.
    pub pose_name: String,
    /// Action endpoint served by the pose manager.
    pub action_endpoint: String,
    /// How long to wait for the action server to show up.
    pub server_timeout: Duration,
    /// How long to wait for the goal to finish.
    pub goal_timeout: Duration,
    /// Treat a goal that did not succeed as a failed run.  When off, the
    /// failure is logged and the run still counts as completed.
    pub require_goal_success: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pose_name: "crouch".to_string(),
            action_endpoint: "body_pose".to_string(),
            server_timeout: Duration::from_secs(3),
            goal_timeout: Duration::from_secs(5),
            require_goal_success: false,
        }
    }
}

/// Command-line values that take precedence over the private parameters.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

// ─────────────────────────────────────────────────────────────────────────────
// NaoqiNode
// ─────────────────────────────────────────────────────────────────────────────

pub struct NaoqiNode {
    ctx: Context,
    registry: ProxyRegistry,
    version: OnceCell<NaoqiVersion>,
    actions: Arc<dyn ActionClientFactory>,
    config: NodeConfig,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<RunOutcome>>>,
    outcome: StdMutex<Option<RunOutcome>>,
}

impl NaoqiNode {
    /// Resolve the connection parameters and register the shutdown hook.
    ///
    /// Host and port come from the `~pip` / `~pport` private parameters
    /// (defaulting to `127.0.0.1:9559`), then from `overrides`.
    pub fn init(
        ctx: Context,
        overrides: ConnectionOverrides,
        connector: Arc<dyn ModuleConnector>,
        actions: Arc<dyn ActionClientFactory>,
        config: NodeConfig,
    ) -> Arc<Self> {
        let params = ConnectionParams {
            host: overrides
                .host
                .unwrap_or_else(|| ctx.param("~pip", DEFAULT_HOST.to_string())),
            port: overrides.port.unwrap_or_else(|| ctx.param("~pport", DEFAULT_PORT)),
        };
        info!(node = ctx.name(), broker = %params, "NAOqi connection parameters");

        let node = Arc::new(Self {
            stop: ctx.shutdown_token().child_token(),
            registry: ProxyRegistry::new(connector, params),
            version: OnceCell::new(),
            actions,
            config,
            worker: Mutex::new(None),
            outcome: StdMutex::new(None),
            ctx,
        });

        let weak: Weak<Self> = Arc::downgrade(&node);
        node.ctx.on_shutdown(move || async move {
            if let Some(node) = weak.upgrade() {
                node.on_shutdown().await;
            }
        });

        node
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn params(&self) -> &ConnectionParams {
        self.registry.params()
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// Proxy to `module`, created on first use.  See [`ProxyRegistry::get`].
    pub async fn get_proxy(&self, module: &str, warn: bool) -> Option<Arc<dyn ModuleProxy>> {
        self.registry.get(module, warn).await
    }

    /// The NAOqi version, queried once and cached.
    ///
    /// # Errors
    ///
    /// [`BridgeError::CriticalDependencyUnavailable`] when `ALMemory` cannot
    /// be reached; the version is then never queried.  Transport and parse
    /// errors from the query itself are passed through and nothing is
    /// cached.
    pub async fn get_version(&self) -> Result<NaoqiVersion, BridgeError> {
        self.version
            .get_or_try_init(|| async {
                let proxy = self.get_proxy(MEMORY_MODULE, true).await.ok_or_else(|| {
                    BridgeError::CriticalDependencyUnavailable(MEMORY_MODULE.to_string())
                })?;
                let raw = proxy.version().await?;
                NaoqiVersion::parse(&raw)
            })
            .await
            .cloned()
    }

    /// Version if it has already been fetched.
    pub fn cached_version(&self) -> Option<&NaoqiVersion> {
        self.version.get()
    }

    /// `false` once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled()
    }

    /// Outcome of the worker, once it has been joined.
    pub fn outcome(&self) -> Option<RunOutcome> {
        *self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the worker.  Returns `false` if one was already started.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.is_some() || self.outcome().is_some() {
            warn!(node = self.ctx.name(), "worker already started");
            return false;
        }

        let node = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            let outcome = node.run().await;
            node.ctx.signal_shutdown("pose sequence finished");
            outcome
        }));
        true
    }

    /// Worker body: version, then pose.
    pub async fn run(&self) -> RunOutcome {
        let version = match self.until_stopped(self.get_version()).await {
            Ok(version) => version,
            Err(e) => {
                error!(error = %e, "could not determine NAOqi version");
                return e.outcome();
            }
        };
        println!("{version}");
        info!(version = %version, "connected to NAOqi");

        match self.until_stopped(self.pose()).await {
            Ok(outcome) => outcome,
            Err(e) => e.outcome(),
        }
    }

    /// Drive the robot into the configured pose.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ActionServerUnavailable`] when the action server does
    /// not answer within the server timeout.  Shutdown has been signalled by
    /// then and no goal is sent.
    pub async fn pose(&self) -> Result<RunOutcome, BridgeError> {
        let endpoint = self.config.action_endpoint.as_str();
        let started = Instant::now();
        let deadline = self.config.server_timeout;

        let client = match tokio::time::timeout(deadline, self.actions.create(endpoint)).await {
            Ok(Ok(client)) => Some(client),
            Ok(Err(e)) => {
                warn!(endpoint, error = %e, "could not open action client");
                None
            }
            Err(_) => None,
        };

        let available = match &client {
            Some(client) => {
                client
                    .wait_for_server(deadline.saturating_sub(started.elapsed()))
                    .await
            }
            None => false,
        };

        let client = match client {
            Some(client) if available => client,
            _ => {
                error!(
                    fatal = true,
                    endpoint,
                    "could not connect to required \"{endpoint}\" action server, is the pose_manager node running?"
                );
                self.ctx.signal_shutdown("body pose action server unavailable");
                return Err(BridgeError::ActionServerUnavailable {
                    endpoint: endpoint.to_string(),
                    waited: deadline,
                });
            }
        };

        let goal = BodyPoseGoal::new(self.config.pose_name.as_str());
        info!(pose = %goal.pose_name, "calling pose_manager for pose {}...", goal.pose_name);

        let state = match client.send_goal_and_wait(&goal, self.config.goal_timeout).await {
            Ok(state) => state,
            Err(e) => {
                error!(endpoint, error = %e, "goal was not delivered");
                GoalState::Lost
            }
        };

        if state == GoalState::Succeeded {
            info!(pose = %goal.pose_name, "pose reached");
            return Ok(RunOutcome::Completed);
        }

        if self.config.require_goal_success {
            error!(pose = %goal.pose_name, %state, "pose goal did not succeed");
            Ok(RunOutcome::GoalFailed(state))
        } else {
            warn!(pose = %goal.pose_name, %state, "pose goal did not succeed, finishing anyway");
            Ok(RunOutcome::Completed)
        }
    }

    /// Shutdown hook: stop the worker, wait for it, release the proxies.
    ///
    /// Safe to call more than once; later calls find no worker to join.
    pub async fn on_shutdown(&self) {
        info!(node = self.ctx.name(), "stopping");
        self.stop.cancel();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "worker task failed");
                    RunOutcome::Cancelled
                }
            };
            *self
                .outcome
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(outcome);
        }

        let released = self.registry.release_all().await;
        info!(node = self.ctx.name(), released, "stopped");
    }

    async fn until_stopped<T>(
        &self,
        fut: impl Future<Output = Result<T, BridgeError>>,
    ) -> Result<T, BridgeError> {
        tokio::select! {
            _ = self.stop.cancelled() => Err(BridgeError::Cancelled),
            result = fut => result,
        }
    }
}
