//! 连接注册表
//!
//! 所有连接实现 Connection trait（configure / is_configured / list_actions / perform_action），
//! 由 ConnectionRegistry 按名注册与查找；ActionDispatcher 在调用时做门控、超时与结果归一化。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 动作参数描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl ActionParameter {
    pub fn new(name: &str, required: bool, kind: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            required,
            kind: kind.to_string(),
            description: description.to_string(),
        }
    }
}

/// 连接对外暴露的动作描述（名称、说明、参数列表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

impl ActionDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ActionParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// 连接配置状态（列表 / 单个查询共用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub configured: bool,
    pub is_llm_provider: bool,
}

/// 连接 trait：能力提供方（社交平台、LLM、链上钱包……），核心只调用、不实现
///
/// 连接内部的可变状态（如 configure 写入的凭据）由实现方自行负责并发安全，
/// 因此所有方法都只拿 `&self`。
#[async_trait]
pub trait Connection: Send + Sync {
    /// 连接名称（注册表中的键）
    fn name(&self) -> &str;

    /// 写入配置，返回是否成功
    fn configure(&self, params: &Map<String, Value>) -> bool;

    /// 是否已配置；verbose 为 true 时实现方可输出缺失项等详细日志
    fn is_configured(&self, verbose: bool) -> bool;

    /// 支持的动作列表
    fn list_actions(&self) -> Vec<ActionDescriptor>;

    /// 执行动作；`Ok(None)` 表示提供方没有产出结果，会被分发器视为失败
    async fn perform_action(&self, action: &str, params: Value) -> Result<Option<Value>, String>;

    fn is_llm_provider(&self) -> bool {
        false
    }

    /// 是否要求「先配置后使用」：为 true 时 list_actions / dispatch 前需通过 is_configured(true)
    fn requires_configuration(&self) -> bool {
        false
    }
}

/// 连接注册表：按名称存储 Arc<dyn Connection>；加载完成后对分发器只读
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: impl Connection + 'static) {
        self.register_arc(Arc::new(connection));
    }

    /// 注册已共享的连接（同一实例可被外部继续持有，如测试中观察内部状态）
    pub fn register_arc(&mut self, connection: Arc<dyn Connection>) {
        let name = connection.name().to_string();
        self.connections.insert(name, connection);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 已注册的连接名，按字母序
    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// 所有连接的配置状态（非 verbose 检查），按名称排序
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut statuses: Vec<ConnectionStatus> = self
            .connections
            .iter()
            .map(|(name, conn)| ConnectionStatus {
                name: name.clone(),
                configured: conn.is_configured(false),
                is_llm_provider: conn.is_llm_provider(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// 是否存在已配置的 LLM 提供方
    pub fn has_configured_llm(&self) -> bool {
        self.connections
            .values()
            .any(|conn| conn.is_llm_provider() && conn.is_configured(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::EchoConnection;

    #[test]
    fn test_register_and_get() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        registry.register(EchoConnection::new());
        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("twitter").is_none());
    }

    #[test]
    fn test_statuses_sorted_by_name() {
        let mut registry = ConnectionRegistry::new();
        registry.register(EchoConnection::gated("vault"));
        registry.register(EchoConnection::new());
        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "echo");
        assert!(statuses[0].configured);
        assert_eq!(statuses[1].name, "vault");
        assert!(!statuses[1].configured);
        assert!(!registry.has_configured_llm());
    }

    #[test]
    fn test_action_descriptor_serializes_type_field() {
        let descriptor = ActionDescriptor::new("post", "Post a message")
            .with_parameter(ActionParameter::new("text", true, "string", "Message body"));
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["parameters"][0]["type"], "string");
        assert_eq!(json["parameters"][0]["required"], true);
    }
}
