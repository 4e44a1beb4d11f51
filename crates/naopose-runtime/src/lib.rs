//! `naopose-runtime` – the pose bridge node.
//!
//! # Modules
//!
//! - [`node`] – [`NaoqiNode`][node::NaoqiNode]: resolves the broker
//!   address, fetches the NAOqi version once, drives the `body_pose` action
//!   from a single worker task and joins it on shutdown.
//! - [`proxy_registry`] – [`ProxyRegistry`][proxy_registry::ProxyRegistry]:
//!   lazily created module proxies, with failed attempts remembered instead
//!   of retried.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber, with OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod node;
pub mod proxy_registry;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use node::{ConnectionOverrides, NaoqiNode, NodeConfig};
pub use proxy_registry::{ProxyRegistry, ProxySlot, SlotStatus};
pub use telemetry::{TracerProviderGuard, init_tracing};
