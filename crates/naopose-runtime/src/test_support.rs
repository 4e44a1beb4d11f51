//! In-memory doubles for the broker and the action server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use naopose_middleware::{ActionClient, ActionClientFactory, ModuleConnector, ModuleProxy};
use naopose_types::{BodyPoseGoal, BridgeError, ConnectionParams, GoalState};
use serde_json::{Value, json};

pub struct FakeBroker {
    hosted: Mutex<HashSet<String>>,
    version: String,
    connects: Mutex<HashMap<String, usize>>,
    version_calls: AtomicUsize,
    hang_version: AtomicBool,
    hung_connects: Mutex<HashSet<String>>,
}

impl FakeBroker {
    pub fn new(modules: &[&str], version: &str) -> Arc<Self> {
        Arc::new(Self {
            hosted: Mutex::new(modules.iter().map(|m| m.to_string()).collect()),
            version: version.to_string(),
            connects: Mutex::new(HashMap::new()),
            version_calls: AtomicUsize::new(0),
            hang_version: AtomicBool::new(false),
            hung_connects: Mutex::new(HashSet::new()),
        })
    }

    pub fn host(&self, module: &str) {
        self.hosted.lock().unwrap().insert(module.to_string());
    }

    /// Make `version()` block forever.
    pub fn hang_version(&self) {
        self.hang_version.store(true, Ordering::SeqCst);
    }

    /// Make connects to `module` block forever once counted.
    pub fn hang_connect(&self, module: &str) {
        self.hung_connects.lock().unwrap().insert(module.to_string());
    }

    pub fn connects(&self, module: &str) -> usize {
        self.connects.lock().unwrap().get(module).copied().unwrap_or(0)
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }
}

struct FakeConnector(Arc<FakeBroker>);

pub fn connector(broker: &Arc<FakeBroker>) -> Arc<dyn ModuleConnector> {
    Arc::new(FakeConnector(Arc::clone(broker)))
}

#[async_trait]
impl ModuleConnector for FakeConnector {
    async fn connect(
        &self,
        module: &str,
        _params: &ConnectionParams,
    ) -> Result<Arc<dyn ModuleProxy>, BridgeError> {
        // Yield so racing callers really interleave.
        tokio::task::yield_now().await;
        *self.0.connects.lock().unwrap().entry(module.to_string()).or_default() += 1;
        let hung = self.0.hung_connects.lock().unwrap().contains(module);
        if hung {
            std::future::pending::<()>().await;
        }
        if !self.0.hosted.lock().unwrap().contains(module) {
            return Err(BridgeError::ConnectionFailed {
                module: module.to_string(),
                reason: "module not found".to_string(),
            });
        }
        Ok(Arc::new(FakeProxy {
            module: module.to_string(),
            broker: Arc::clone(&self.0),
        }))
    }
}

struct FakeProxy {
    module: String,
    broker: Arc<FakeBroker>,
}

#[async_trait]
impl ModuleProxy for FakeProxy {
    fn module_name(&self) -> &str {
        &self.module
    }

    async fn call(&self, method: &str, _params: Vec<Value>) -> Result<Value, BridgeError> {
        match method {
            "version" => {
                self.broker.version_calls.fetch_add(1, Ordering::SeqCst);
                if self.broker.hang_version.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                tokio::task::yield_now().await;
                Ok(json!(self.broker.version))
            }
            _ => Ok(Value::Null),
        }
    }
}

/// Scripted action server.
pub struct FakeActionServer {
    pub available: bool,
    pub reachable: bool,
    pub final_state: GoalState,
    pub goals: Mutex<Vec<BodyPoseGoal>>,
    pub waits: Mutex<Vec<Duration>>,
}

impl FakeActionServer {
    pub fn new(available: bool, final_state: GoalState) -> Arc<Self> {
        Arc::new(Self {
            available,
            reachable: true,
            final_state,
            goals: Mutex::new(Vec::new()),
            waits: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            available: false,
            reachable: false,
            final_state: GoalState::Lost,
            goals: Mutex::new(Vec::new()),
            waits: Mutex::new(Vec::new()),
        })
    }

    pub fn goals(&self) -> Vec<BodyPoseGoal> {
        self.goals.lock().unwrap().clone()
    }
}

struct FakeFactory(Arc<FakeActionServer>);

pub fn actions(server: &Arc<FakeActionServer>) -> Arc<dyn ActionClientFactory> {
    Arc::new(FakeFactory(Arc::clone(server)))
}

#[async_trait]
impl ActionClientFactory for FakeFactory {
    async fn create(&self, endpoint: &str) -> Result<Box<dyn ActionClient>, BridgeError> {
        if !self.0.reachable {
            return Err(BridgeError::Transport("connection refused".to_string()));
        }
        Ok(Box::new(FakeClient {
            endpoint: endpoint.to_string(),
            server: Arc::clone(&self.0),
        }))
    }
}

struct FakeClient {
    endpoint: String,
    server: Arc<FakeActionServer>,
}

#[async_trait]
impl ActionClient for FakeClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn wait_for_server(&self, timeout: Duration) -> bool {
        self.server.waits.lock().unwrap().push(timeout);
        self.server.available
    }

    async fn send_goal_and_wait(
        &self,
        goal: &BodyPoseGoal,
        timeout: Duration,
    ) -> Result<GoalState, BridgeError> {
        self.server.goals.lock().unwrap().push(goal.clone());
        self.server.waits.lock().unwrap().push(timeout);
        Ok(self.server.final_state)
    }
}
