//! Agent 句柄与加载
//!
//! AgentHandle 打包一个已加载 Agent 的名称、连接注册表与 LLM 就绪标记；
//! AgentSlot 持有「当前」句柄，加载新 Agent 时整体替换 Arc（不做字段级修改），
//! 并发读者只会看到旧句柄或新句柄；AgentLoader 是外部加载逻辑的接入点。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::connections::ConnectionRegistry;

/// 已加载的 Agent；创建后不可变，通过 Arc 共享
pub struct AgentHandle {
    name: String,
    registry: ConnectionRegistry,
    llm_ready: bool,
}

impl AgentHandle {
    /// llm_ready 默认取「是否存在已配置的 LLM 提供方连接」
    pub fn new(name: impl Into<String>, registry: ConnectionRegistry) -> Self {
        let llm_ready = registry.has_configured_llm();
        Self {
            name: name.into(),
            registry,
            llm_ready,
        }
    }

    pub fn with_llm_ready(mut self, llm_ready: bool) -> Self {
        self.llm_ready = llm_ready;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn llm_ready(&self) -> bool {
        self.llm_ready
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("connections", &self.registry.connection_names())
            .field("llm_ready", &self.llm_ready)
            .finish()
    }
}

/// 当前活跃 Agent 的持有者：读者克隆 Arc 后立即释放锁
#[derive(Default)]
pub struct AgentSlot {
    current: RwLock<Option<Arc<AgentHandle>>>,
}

impl AgentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<AgentHandle>> {
        self.current.read().await.clone()
    }

    /// 整体替换当前句柄，返回被替换的旧句柄
    pub async fn replace(&self, handle: Arc<AgentHandle>) -> Option<Arc<AgentHandle>> {
        self.current.write().await.replace(handle)
    }
}

/// 外部 Agent 加载器：按标识构建 AgentHandle（解析定义、创建连接都在外部完成）
#[async_trait]
pub trait AgentLoader: Send + Sync {
    async fn load(&self, identifier: &str) -> Result<AgentHandle, String>;

    /// 可加载的 Agent 标识；默认不提供枚举能力
    fn available(&self) -> Vec<String> {
        Vec::new()
    }
}

type RegistryFactory = Box<dyn Fn() -> ConnectionRegistry + Send + Sync>;

/// 内存加载器：按名称登记「注册表工厂」，每次加载都构建全新的连接实例
#[derive(Default)]
pub struct StaticAgentLoader {
    factories: HashMap<String, RegistryFactory>,
}

impl StaticAgentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> ConnectionRegistry + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }
}

#[async_trait]
impl AgentLoader for StaticAgentLoader {
    async fn load(&self, identifier: &str) -> Result<AgentHandle, String> {
        let factory = self
            .factories
            .get(identifier)
            .ok_or_else(|| format!("Agent {identifier} not found"))?;
        Ok(AgentHandle::new(identifier, factory()))
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::EchoConnection;

    fn echo_registry() -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new();
        registry.register(EchoConnection::new());
        registry
    }

    #[tokio::test]
    async fn test_slot_replace_returns_previous() {
        let slot = AgentSlot::new();
        assert!(slot.current().await.is_none());

        let first = Arc::new(AgentHandle::new("first", echo_registry()));
        assert!(slot.replace(first.clone()).await.is_none());

        let reader = slot.current().await.unwrap();
        let second = Arc::new(AgentHandle::new("second", echo_registry()));
        let previous = slot.replace(second).await.unwrap();

        assert!(Arc::ptr_eq(&previous, &first));
        // 替换前取到的 Arc 仍指向完整的旧句柄
        assert_eq!(reader.name(), "first");
        assert_eq!(slot.current().await.unwrap().name(), "second");
    }

    #[tokio::test]
    async fn test_static_loader() {
        let loader = StaticAgentLoader::new()
            .with_agent("beta", echo_registry)
            .with_agent("alpha", ConnectionRegistry::new);
        assert_eq!(loader.available(), vec!["alpha", "beta"]);

        let handle = loader.load("beta").await.unwrap();
        assert_eq!(handle.name(), "beta");
        assert!(handle.registry().contains("echo"));
        assert!(!handle.llm_ready());

        let err = loader.load("gamma").await.unwrap_err();
        assert!(err.contains("gamma"));
    }

    #[test]
    fn test_llm_ready_override() {
        let handle = AgentHandle::new("a", ConnectionRegistry::new()).with_llm_ready(true);
        assert!(handle.llm_ready());
    }
}
