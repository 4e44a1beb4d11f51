//! Action clients for the `BodyPose` action.
//!
//! [`ActionClient`] is the two-primitive surface the pose flow needs:
//! wait for the server, then send a goal and wait for its terminal state.
//! [`RosbridgeActionClient`] implements it against a ROS1 actionlib server
//! reached through a `rosbridge_server` WebSocket:
//!
//! | Topic | Direction | Type |
//! |---|---|---|
//! | `<ns>/status` | subscribe | `actionlib_msgs/GoalStatusArray` |
//! | `<ns>/result` | subscribe | `naoqi_bridge_msgs/BodyPoseActionResult` |
//! | `<ns>/goal` | advertise | `naoqi_bridge_msgs/BodyPoseActionGoal` |
//! | `<ns>/cancel` | advertise | `actionlib_msgs/GoalID` |
//!
//! The server counts as available once a status message has been seen,
//! mirroring how `SimpleActionClient::wait_for_server` works.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use naopose_types::{BodyPoseGoal, BridgeError, GoalState};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default `rosbridge_server` address.
pub const DEFAULT_ROSBRIDGE_URL: &str = "ws://127.0.0.1:9090";

const GOAL_TYPE: &str = "naoqi_bridge_msgs/BodyPoseActionGoal";
const RESULT_TYPE: &str = "naoqi_bridge_msgs/BodyPoseActionResult";
const STATUS_TYPE: &str = "actionlib_msgs/GoalStatusArray";
const CANCEL_TYPE: &str = "actionlib_msgs/GoalID";

/// Client side of a named action endpoint.
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// The endpoint this client is bound to, e.g. `"body_pose"`.
    fn endpoint(&self) -> &str;

    /// Wait up to `timeout` for the server to come up.
    async fn wait_for_server(&self, timeout: Duration) -> bool;

    /// Submit `goal` and wait up to `timeout` for it to reach a terminal
    /// state.  A goal that is still running when the timeout expires is
    /// cancelled and its last known state returned.
    async fn send_goal_and_wait(
        &self,
        goal: &BodyPoseGoal,
        timeout: Duration,
    ) -> Result<GoalState, BridgeError>;
}

/// Builds [`ActionClient`]s bound to an endpoint.
#[async_trait]
pub trait ActionClientFactory: Send + Sync {
    async fn create(&self, endpoint: &str) -> Result<Box<dyn ActionClient>, BridgeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// rosbridge transport
// ─────────────────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the client has learned about the server so far.
#[derive(Debug, Default, Clone)]
struct ServerView {
    status_seen: bool,
    goals: HashMap<String, GoalState>,
}

impl ServerView {
    fn state_of(&self, goal_id: &str) -> Option<GoalState> {
        self.goals.get(goal_id).copied()
    }
}

/// [`ActionClientFactory`] producing [`RosbridgeActionClient`]s.
#[derive(Debug, Clone)]
pub struct RosbridgeActionFactory {
    url: String,
    caller_id: String,
}

impl RosbridgeActionFactory {
    /// `caller_id` prefixes every goal id, usually the node name.
    pub fn new(url: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            caller_id: caller_id.into(),
        }
    }
}

#[async_trait]
impl ActionClientFactory for RosbridgeActionFactory {
    async fn create(&self, endpoint: &str) -> Result<Box<dyn ActionClient>, BridgeError> {
        let client = RosbridgeActionClient::connect(&self.url, endpoint, &self.caller_id).await?;
        Ok(Box::new(client))
    }
}

/// actionlib client speaking the rosbridge v2 JSON protocol.
pub struct RosbridgeActionClient {
    endpoint: String,
    namespace: String,
    caller_id: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    view: watch::Receiver<ServerView>,
    reader: JoinHandle<()>,
}

impl Drop for RosbridgeActionClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl RosbridgeActionClient {
    /// Connect to `url`, subscribe to the action's feedback topics and
    /// advertise its command topics.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the WebSocket cannot be opened
    /// or the setup frames cannot be sent.
    pub async fn connect(url: &str, endpoint: &str, caller_id: &str) -> Result<Self, BridgeError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::Transport(format!("rosbridge {url}: {e}")))?;
        let (mut sink, source) = stream.split();

        let namespace = action_namespace(endpoint);
        let setup = [
            ("subscribe", "status", STATUS_TYPE),
            ("subscribe", "result", RESULT_TYPE),
            ("advertise", "goal", GOAL_TYPE),
            ("advertise", "cancel", CANCEL_TYPE),
        ];
        for (op, topic, ty) in setup {
            let frame = json!({ "op": op, "topic": format!("{namespace}/{topic}"), "type": ty });
            sink.send(Message::Text(frame.to_string().into()))
                .await
                .map_err(|e| BridgeError::Transport(format!("rosbridge setup: {e}")))?;
        }

        let (tx, view) = watch::channel(ServerView::default());
        let reader = tokio::spawn(read_loop(source, namespace.clone(), tx));

        debug!(endpoint, url, "action client connected");
        Ok(Self {
            endpoint: endpoint.to_string(),
            namespace,
            caller_id: caller_id.to_string(),
            sink: Mutex::new(sink),
            view,
            reader,
        })
    }

    async fn publish(&self, topic: String, msg: Value) -> Result<(), BridgeError> {
        let frame = json!({ "op": "publish", "topic": topic, "msg": msg });
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| BridgeError::Transport(format!("rosbridge publish: {e}")))
    }

    async fn cancel(&self, goal_id: &str) -> Result<(), BridgeError> {
        self.publish(
            format!("{}/cancel", self.namespace),
            json!({ "stamp": { "secs": 0, "nsecs": 0 }, "id": goal_id }),
        )
        .await
    }
}

#[async_trait]
impl ActionClient for RosbridgeActionClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn wait_for_server(&self, timeout: Duration) -> bool {
        let mut view = self.view.clone();
        matches!(
            tokio::time::timeout(timeout, view.wait_for(|v| v.status_seen)).await,
            Ok(Ok(_))
        )
    }

    async fn send_goal_and_wait(
        &self,
        goal: &BodyPoseGoal,
        timeout: Duration,
    ) -> Result<GoalState, BridgeError> {
        let now = Utc::now();
        let stamp = json!({ "secs": now.timestamp(), "nsecs": now.timestamp_subsec_nanos() });
        let goal_id = format!("{}-{}", self.caller_id, Uuid::new_v4());

        self.publish(
            format!("{}/goal", self.namespace),
            json!({
                "header": { "seq": 0, "stamp": stamp, "frame_id": "" },
                "goal_id": { "stamp": stamp, "id": goal_id },
                "goal": goal,
            }),
        )
        .await?;
        info!(endpoint = %self.endpoint, goal_id = %goal_id, pose = %goal.pose_name, "goal sent");

        let mut view = self.view.clone();
        let finished = match tokio::time::timeout(
            timeout,
            view.wait_for(|v| v.state_of(&goal_id).is_some_and(GoalState::is_terminal)),
        )
        .await
        {
            Ok(Ok(v)) => Some(v.state_of(&goal_id).unwrap_or(GoalState::Lost)),
            Ok(Err(_)) => {
                return Err(BridgeError::Transport("rosbridge connection lost".to_string()));
            }
            Err(_) => None,
        };

        if let Some(state) = finished {
            return Ok(state);
        }

        warn!(
            endpoint = %self.endpoint,
            goal_id = %goal_id,
            ?timeout,
            "goal timed out, cancelling"
        );
        self.cancel(&goal_id).await?;
        Ok(self.view.borrow().state_of(&goal_id).unwrap_or(GoalState::Lost))
    }
}

/// `"body_pose"` → `"/body_pose"`.
fn action_namespace(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    namespace: String,
    tx: watch::Sender<ServerView>,
) {
    let status_topic = format!("{namespace}/status");
    let result_topic = format!("{namespace}/result");

    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "rosbridge read error");
                break;
            }
        };
        let Ok(json) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };

        match json.get("op").and_then(Value::as_str) {
            Some("publish") => {}
            Some("status") => {
                let level = json.get("level").and_then(serde_json::Value::as_str).unwrap_or("");
                let detail = json.get("msg").and_then(serde_json::Value::as_str).unwrap_or("");
                warn!(level, detail, "rosbridge status");
                continue;
            }
            _ => continue,
        }

        let topic = json.get("topic").and_then(Value::as_str).unwrap_or("");
        let msg = json.get("msg").cloned().unwrap_or(Value::Null);

        if topic == status_topic {
            let updates: Vec<(String, GoalState)> = msg
                .get("status_list")
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(parse_goal_status).collect())
                .unwrap_or_default();
            tx.send_modify(|v| {
                v.status_seen = true;
                for (id, state) in updates {
                    // A result is final; a late status array must not roll it back.
                    let keep = v.state_of(&id).is_some_and(GoalState::is_terminal);
                    if !keep {
                        v.goals.insert(id, state);
                    }
                }
            });
        } else if topic == result_topic {
            if let Some((id, state)) = msg.get("status").and_then(parse_goal_status) {
                tx.send_modify(|v| {
                    v.status_seen = true;
                    v.goals.insert(id, state);
                });
            }
        }
    }
}

/// Extract `(goal_id.id, status)` from an `actionlib_msgs/GoalStatus`.
fn parse_goal_status(status: &Value) -> Option<(String, GoalState)> {
    let id = status.get("goal_id")?.get("id")?.as_str()?.to_string();
    let code = status.get("status")?.as_u64()?;
    Some((id, GoalState::from_code(code)))
}
