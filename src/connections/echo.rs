//! Echo 连接（测试 / 本地演示用）

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::connections::{ActionDescriptor, ActionParameter, Connection};

/// Echo 连接：回显文本；gated 版本需先 configure 一个 token 才能使用
pub struct EchoConnection {
    name: String,
    gated: bool,
    token: RwLock<Option<String>>,
}

impl EchoConnection {
    /// 名为 "echo"、无需配置的连接
    pub fn new() -> Self {
        Self {
            name: "echo".to_string(),
            gated: false,
            token: RwLock::new(None),
        }
    }

    /// 需要先 configure({"token": "..."}) 的连接
    pub fn gated(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gated: true,
            token: RwLock::new(None),
        }
    }
}

impl Default for EchoConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for EchoConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, params: &Map<String, Value>) -> bool {
        let Some(token) = params.get("token").and_then(|v| v.as_str()) else {
            tracing::warn!(connection = %self.name, "configure: missing token");
            return false;
        };
        if token.trim().is_empty() {
            return false;
        }
        match self.token.write() {
            Ok(mut guard) => {
                *guard = Some(token.to_string());
                true
            }
            Err(_) => false,
        }
    }

    fn is_configured(&self, verbose: bool) -> bool {
        if !self.gated {
            return true;
        }
        let configured = self
            .token
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        if verbose && !configured {
            tracing::info!(connection = %self.name, "token not set, run configure first");
        }
        configured
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new("echo", "Echo text back")
            .with_parameter(ActionParameter::new("text", true, "string", "Text to echo"))]
    }

    async fn perform_action(&self, action: &str, params: Value) -> Result<Option<Value>, String> {
        match action {
            "echo" => {
                let text = params
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "Missing required parameter: text".to_string())?;
                Ok(Some(json!({ "text": text })))
            }
            other => Err(format!("Unknown action: {other}")),
        }
    }

    fn requires_configuration(&self) -> bool {
        self.gated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_action() {
        let conn = EchoConnection::new();
        let out = conn
            .perform_action("echo", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn test_echo_unknown_action() {
        let conn = EchoConnection::new();
        let err = conn.perform_action("shout", json!({})).await.unwrap_err();
        assert!(err.contains("shout"));
    }

    #[test]
    fn test_gated_configure() {
        let conn = EchoConnection::gated("vault");
        assert!(conn.requires_configuration());
        assert!(!conn.is_configured(false));

        let mut bad = Map::new();
        bad.insert("token".into(), json!("  "));
        assert!(!conn.configure(&bad));
        assert!(!conn.is_configured(false));

        let mut good = Map::new();
        good.insert("token".into(), json!("secret"));
        assert!(conn.configure(&good));
        assert!(conn.is_configured(true));
    }
}
