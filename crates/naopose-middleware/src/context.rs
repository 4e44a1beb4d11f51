//! [`Context`] – explicit node participation handle.
//!
//! A ROS node normally registers itself as an ambient, process-wide side
//! effect.  Here the registration is a value: the node's name, its private
//! parameter store, the shutdown signal, and the ordered list of shutdown
//! hooks all live in a [`Context`] that is handed to whoever needs them.
//!
//! Cloning a `Context` is cheap; every clone shares the same state.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use naopose_middleware::Context;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = Context::init("naoqi_pose", HashMap::new()).unwrap();
//! let port: u16 = ctx.param("~pport", 9559);
//! assert_eq!(port, 9559);
//!
//! ctx.signal_shutdown("done");
//! ctx.spin().await;
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use naopose_types::BridgeError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct ContextInner {
    name: String,
    params: HashMap<String, Value>,
    shutdown: CancellationToken,
    shutdown_reason: Mutex<Option<String>>,
    hooks: Mutex<Vec<ShutdownHook>>,
}

/// Shared node context.  See the [module documentation](self).
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("params", &self.inner.params.keys().collect::<Vec<_>>())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Context {
    /// Register a node called `name` with the given private parameters.
    ///
    /// Parameter keys are stored without the leading `~`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidNodeName`] unless `name` starts with an
    /// ASCII letter and contains only ASCII alphanumerics and `_`.
    pub fn init(name: &str, params: HashMap<String, Value>) -> Result<Self, BridgeError> {
        validate_node_name(name)?;

        let params = params
            .into_iter()
            .map(|(k, v)| (k.trim_start_matches('~').to_string(), v))
            .collect();

        info!(node = name, "node registered");

        Ok(Self {
            inner: Arc::new(ContextInner {
                name: name.to_string(),
                params,
                shutdown: CancellationToken::new(),
                shutdown_reason: Mutex::new(None),
                hooks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Read private parameter `key` (with or without the leading `~`).
    ///
    /// Falls back to `default` when the parameter is unset or holds a value
    /// of the wrong type; the latter is logged.
    pub fn param<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let key = key.trim_start_matches('~');
        let Some(raw) = self.inner.params.get(key) else {
            return default;
        };
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    node = %self.inner.name,
                    param = key,
                    error = %e,
                    "ignoring malformed parameter"
                );
                default
            }
        }
    }

    /// Whether private parameter `key` has been set.
    pub fn has_param(&self, key: &str) -> bool {
        self.inner.params.contains_key(key.trim_start_matches('~'))
    }

    /// Register a hook that runs once when the node shuts down.
    ///
    /// Hooks run sequentially in registration order.
    pub fn on_shutdown<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: ShutdownHook = Box::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) });
        self.lock_hooks().push(boxed);
    }

    /// Ask the node to shut down.  Only the first reason is kept.
    pub fn signal_shutdown(&self, reason: &str) {
        {
            let mut slot = self
                .inner
                .shutdown_reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.to_string());
        }
        info!(node = %self.inner.name, reason, "shutdown requested");
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.inner
            .shutdown_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Token cancelled when shutdown is signalled.  Child tokens are cancelled
    /// with it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Block until shutdown is signalled, then run the shutdown hooks.
    pub async fn spin(&self) {
        self.inner.shutdown.cancelled().await;
        self.run_shutdown_hooks().await;
    }

    async fn run_shutdown_hooks(&self) {
        let hooks = std::mem::take(&mut *self.lock_hooks());
        debug!(node = %self.inner.name, count = hooks.len(), "running shutdown hooks");
        for hook in hooks {
            hook().await;
        }
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Vec<ShutdownHook>> {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_node_name(name: &str) -> Result<(), BridgeError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BridgeError::InvalidNodeName(name.to_string()))
    }
}
