//! Remote NAOqi module handles.
//!
//! The bridge never talks to the NAOqi broker directly.  It asks a
//! [`ModuleConnector`] for a [`ModuleProxy`] and issues method calls through
//! it.  [`WsModuleConnector`] is the shipped transport: one WebSocket per
//! module carrying JSON request/response frames.
//!
//! # Wire format
//!
//! ```text
//! → {"id": "<uuid>", "module": "ALMemory", "method": "version", "params": []}
//! ← {"id": "<uuid>", "result": "2.8.5.10"}
//! ← {"id": "<uuid>", "error": "module not found"}
//! ```
//!
//! A connection is only handed out after the module answers `ping`, so a
//! proxy to a module the broker does not host fails at creation time, the
//! same way an `ALProxy` constructor does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use naopose_types::{BridgeError, ConnectionParams};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Default bound on opening a module connection, `ping` included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single module call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known module that always answers `version()`.
pub const MEMORY_MODULE: &str = "ALMemory";

/// A local stand-in for a remote NAOqi module.
#[async_trait]
pub trait ModuleProxy: Send + Sync {
    /// Name of the module this proxy is bound to.
    fn module_name(&self) -> &str;

    /// Invoke `method` with positional `params` and return its result.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError>;

    /// Query the NAOqi version string reported by the module.
    async fn version(&self) -> Result<String, BridgeError> {
        let value = self.call("version", Vec::new()).await?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            BridgeError::Protocol(format!(
                "{}.version() returned a non-string value: {value}",
                self.module_name()
            ))
        })
    }
}

/// Factory for [`ModuleProxy`] handles.
#[async_trait]
pub trait ModuleConnector: Send + Sync {
    /// Open a handle to `module` on the broker at `params`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConnectionFailed`] when the broker cannot be
    /// reached or does not host `module`.
    async fn connect(
        &self,
        module: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn ModuleProxy>, BridgeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket transport
// ─────────────────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`ModuleConnector`] that reaches the broker at `ws://host:port/`.
#[derive(Debug, Clone)]
pub struct WsModuleConnector {
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl Default for WsModuleConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsModuleConnector {
    /// `connect_timeout` bounds the handshake and the `ping` that follows it.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound on every call made through the proxies this connector hands out.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn open(&self, module: &str, url: &str) -> Result<WsModuleProxy, BridgeError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::Transport(format!("{url}: {e}")))?;

        let proxy = WsModuleProxy {
            module: module.to_string(),
            stream: Mutex::new(stream),
            call_timeout: self.call_timeout,
        };
        proxy.exchange("ping", Vec::new()).await?;
        Ok(proxy)
    }
}

#[async_trait]
impl ModuleConnector for WsModuleConnector {
    #[instrument(skip(self), fields(broker = %params))]
    async fn connect(
        &self,
        module: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn ModuleProxy>, BridgeError> {
        let url = format!("ws://{}:{}/", params.host, params.port);
        let failed = |reason: String| BridgeError::ConnectionFailed {
            module: module.to_string(),
            reason,
        };

        let proxy = tokio::time::timeout(self.connect_timeout, self.open(module, &url))
            .await
            .map_err(|_| {
                failed(format!(
                    "no answer from {url} within {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| failed(e.to_string()))?;

        debug!(module, "module proxy ready");
        Ok(Arc::new(proxy))
    }
}

/// One WebSocket bound to one module.  Calls are serialised on the socket.
pub struct WsModuleProxy {
    module: String,
    stream: Mutex<WsStream>,
    call_timeout: Duration,
}

impl WsModuleProxy {
    /// Send one request and read frames until its reply arrives.
    async fn exchange(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError> {
        let id = Uuid::new_v4().to_string();
        let request = json!({
            "id": id,
            "module": self.module,
            "method": method,
            "params": params,
        });

        let mut stream = self.stream.lock().await;
        stream
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| BridgeError::Transport(format!("{}.{method}: {e}", self.module)))?;

        loop {
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    return Err(BridgeError::Transport(format!("{}.{method}: {e}", self.module)));
                }
                None => {
                    return Err(BridgeError::Transport(format!(
                        "{}.{method}: connection closed",
                        self.module
                    )));
                }
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(BridgeError::Transport(format!(
                        "{}.{method}: connection closed",
                        self.module
                    )));
                }
                _ => continue,
            };

            let reply: Value = serde_json::from_str(text.as_str())
                .map_err(|e| BridgeError::Protocol(format!("malformed reply: {e}")))?;
            if reply.get("id").and_then(Value::as_str) != Some(id.as_str()) {
                // Stale reply to a call that timed out earlier.
                continue;
            }
            if let Some(err) = reply.get("error") {
                let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
                return Err(BridgeError::Protocol(format!("{}.{method}: {msg}", self.module)));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

#[async_trait]
impl ModuleProxy for WsModuleProxy {
    fn module_name(&self) -> &str {
        &self.module
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError> {
        tokio::time::timeout(self.call_timeout, self.exchange(method, params))
            .await
            .map_err(|_| {
                BridgeError::Transport(format!(
                    "{}.{method}: no reply within {:?}",
                    self.module, self.call_timeout
                ))
            })?
    }
}
