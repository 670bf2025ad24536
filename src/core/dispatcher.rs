//! 动作分发器
//!
//! 按 (connection, action, params) 在当前 Agent 的连接注册表中解析连接，
//! 在独立 tokio 任务中执行 perform_action（调用方只等待结果，不承担执行），
//! 提供方的错误、空结果、panic、超时统一转为 ActionFailed；每次分发输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinError;
use tokio::time::timeout;

use crate::agent::AgentSlot;
use crate::connections::{ActionDescriptor, Connection, ConnectionStatus};
use crate::core::lifecycle::panic_message;
use crate::core::{ControlError, ErrorKind};

/// 动作请求；params 缺省为空对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub connection: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(connection: &str, action: &str) -> Self {
        Self {
            connection: connection.to_string(),
            action: action.to_string(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// 动作结果：成功值或带类别的失败
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    Success { result: Value },
    Failure { kind: ErrorKind, message: String },
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ActionResult::Success { .. } => None,
            ActionResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<Result<Value, ControlError>> for ActionResult {
    fn from(result: Result<Value, ControlError>) -> Self {
        match result {
            Ok(value) => ActionResult::Success { result: value },
            Err(e) => {
                let message = match e {
                    ControlError::ActionFailed(ref msg) => msg.clone(),
                    ref other => other.to_string(),
                };
                ActionResult::Failure {
                    kind: e.kind(),
                    message,
                }
            }
        }
    }
}

/// 动作分发器：只读当前 AgentSlot，不持有任何跨请求的锁
pub struct ActionDispatcher {
    slot: Arc<AgentSlot>,
    action_timeout: Option<Duration>,
}

impl ActionDispatcher {
    pub fn new(slot: Arc<AgentSlot>, action_timeout: Option<Duration>) -> Self {
        Self {
            slot,
            action_timeout,
        }
    }

    /// 执行动作并转为 ActionResult（从不返回未处理的故障）
    pub async fn dispatch(&self, request: ActionRequest) -> ActionResult {
        self.execute(request).await.into()
    }

    /// 执行动作；空结果 / 提供方错误 / panic / 超时均为 ActionFailed
    pub async fn execute(&self, request: ActionRequest) -> Result<Value, ControlError> {
        let start = Instant::now();
        let ActionRequest {
            connection: connection_name,
            action,
            params,
        } = request;
        let preview = params_preview(&params);

        let connection = match self.resolve(&connection_name, true).await {
            Ok(conn) => conn,
            Err(e) => {
                audit(&connection_name, &action, "rejected", start, &preview);
                return Err(e);
            }
        };

        let task_action = action.clone();
        let mut task = tokio::spawn(async move {
            connection
                .perform_action(&task_action, Value::Object(params))
                .await
        });

        let joined = match self.action_timeout {
            Some(limit) => match timeout(limit, &mut task).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    task.abort();
                    None
                }
            },
            None => Some(task.await),
        };

        let (outcome, result) = match joined {
            Some(Ok(Ok(Some(value)))) if !value.is_null() => ("ok", Ok(value)),
            Some(Ok(Ok(_))) => (
                "empty",
                Err(ControlError::ActionFailed(format!(
                    "Action {action} on {connection_name} returned no result"
                ))),
            ),
            Some(Ok(Err(msg))) => ("error", Err(ControlError::ActionFailed(msg))),
            Some(Err(join_err)) => (
                "panic",
                Err(ControlError::ActionFailed(join_failure(&connection_name, &action, join_err))),
            ),
            None => (
                "timeout",
                Err(ControlError::ActionFailed(format!(
                    "Action {action} on {connection_name} timed out after {:?}",
                    self.action_timeout.unwrap_or_default()
                ))),
            ),
        };

        audit(&connection_name, &action, outcome, start, &preview);
        if let Err(ref e) = result {
            tracing::error!(connection = %connection_name, action = %action, "Action failed: {}", e);
        }
        result
    }

    /// 列出连接支持的动作（与 dispatch 相同的解析与配置门控）
    pub async fn list_actions(&self, connection: &str) -> Result<Vec<ActionDescriptor>, ControlError> {
        let conn = self.resolve(connection, true).await?;
        Ok(conn.list_actions())
    }

    /// 配置连接；提供方返回 false 时为 ConfigurationRejected
    pub async fn configure(
        &self,
        connection: &str,
        params: &Map<String, Value>,
    ) -> Result<(), ControlError> {
        let conn = self.resolve(connection, false).await?;
        if conn.configure(params) {
            tracing::info!(connection = %connection, "Connection configured");
            Ok(())
        } else {
            tracing::warn!(connection = %connection, "Connection rejected configuration");
            Err(ControlError::ConfigurationRejected(connection.to_string()))
        }
    }

    /// 单个连接的详细配置状态（is_configured(verbose=true)）
    pub async fn connection_status(&self, connection: &str) -> Result<ConnectionStatus, ControlError> {
        let conn = self.resolve(connection, false).await?;
        Ok(ConnectionStatus {
            name: connection.to_string(),
            configured: conn.is_configured(true),
            is_llm_provider: conn.is_llm_provider(),
        })
    }

    /// 当前 Agent 所有连接的状态
    pub async fn list_connections(&self) -> Result<Vec<ConnectionStatus>, ControlError> {
        let agent = self.slot.current().await.ok_or(ControlError::NoAgentLoaded)?;
        Ok(agent.registry().statuses())
    }

    async fn resolve(&self, name: &str, gated: bool) -> Result<Arc<dyn Connection>, ControlError> {
        let agent = self.slot.current().await.ok_or(ControlError::NoAgentLoaded)?;
        let conn = agent
            .registry()
            .get(name)
            .ok_or_else(|| ControlError::ConnectionNotFound(name.to_string()))?;
        if gated && conn.requires_configuration() && !conn.is_configured(true) {
            return Err(ControlError::ConnectionNotConfigured(name.to_string()));
        }
        Ok(conn)
    }
}

fn join_failure(connection: &str, action: &str, err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        format!(
            "Action {action} on {connection} panicked: {}",
            panic_message(payload.as_ref())
        )
    } else {
        format!("Action {action} on {connection} was cancelled")
    }
}

fn audit(connection: &str, action: &str, outcome: &str, start: Instant, params_preview: &str) {
    let audit = serde_json::json!({
        "event": "action_audit",
        "connection": connection,
        "action": action,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "params_preview": params_preview,
    });
    tracing::info!(audit = %audit.to_string(), "action");
}

// 参数原样截断记录，不做脱敏
fn params_preview(params: &Map<String, Value>) -> String {
    let s = Value::Object(params.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
