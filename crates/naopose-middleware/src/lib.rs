//! `naopose-middleware` – the outside world, behind traits.
//!
//! Everything the pose bridge needs from the robot middleware and from the
//! NAOqi broker is reached through this crate.
//!
//! # Modules
//!
//! - [`context`] – [`Context`]: explicit node participation (name, private
//!   parameters, shutdown signal and hooks, `spin`).
//! - [`naoqi`] – [`ModuleConnector`] / [`ModuleProxy`] plus the
//!   [`WsModuleConnector`] JSON-over-WebSocket transport.
//! - [`action`] – [`ActionClient`] / [`ActionClientFactory`] plus the
//!   [`RosbridgeActionClient`] that drives a ROS1 actionlib server through
//!   `rosbridge_server`.

pub mod action;
pub mod context;
pub mod naoqi;

pub use action::{
    ActionClient, ActionClientFactory, DEFAULT_ROSBRIDGE_URL, RosbridgeActionClient,
    RosbridgeActionFactory,
};
pub use context::Context;
pub use naoqi::{MEMORY_MODULE, ModuleConnector, ModuleProxy, WsModuleConnector};
