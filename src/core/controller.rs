//! Agent 控制器：对传输层暴露的唯一入口
//!
//! 组合 AgentSlot、LifecycleController 与 ActionDispatcher：
//! start / stop / status / dispatch 四个核心操作，加上加载 Agent 与连接管理。
//! HTTP / RPC / CLI 只负责把这些操作映射为各自的请求响应格式。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::agent::{AgentHandle, AgentLoader, AgentSlot};
use crate::connections::{ActionDescriptor, ConnectionStatus};
use crate::core::{
    ActionDispatcher, ActionRequest, ActionResult, ControlError, ControllerStatus,
    LifecycleController,
};

pub struct AgentController {
    slot: Arc<AgentSlot>,
    lifecycle: LifecycleController,
    dispatcher: ActionDispatcher,
    loader: Option<Arc<dyn AgentLoader>>,
}

impl AgentController {
    pub(crate) fn from_parts(
        slot: Arc<AgentSlot>,
        lifecycle: LifecycleController,
        dispatcher: ActionDispatcher,
        loader: Option<Arc<dyn AgentLoader>>,
    ) -> Self {
        Self {
            slot,
            lifecycle,
            dispatcher,
            loader,
        }
    }

    pub async fn start(&self) -> Result<(), ControlError> {
        self.lifecycle.start().await
    }

    /// Idle 时为空操作；运行中则有界等待后回到 Idle
    pub async fn stop(&self) {
        self.lifecycle.stop().await
    }

    pub async fn status(&self) -> ControllerStatus {
        let agent_name = self
            .slot
            .current()
            .await
            .map(|agent| agent.name().to_string());
        // 先读 running 再读运行信息
        let running = self.lifecycle.is_running();
        let run = self.lifecycle.run_info();
        ControllerStatus {
            running,
            agent_name,
            crashed: self.lifecycle.crashed(),
            run_id: run.as_ref().map(|r| r.run_id.to_string()),
            started_at: run.map(|r| r.started_at),
        }
    }

    pub async fn dispatch(&self, request: ActionRequest) -> ActionResult {
        self.dispatcher.dispatch(request).await
    }

    /// 通过加载器加载 Agent 并替换当前句柄（运行中的循环会先被停止）
    pub async fn load_agent(&self, identifier: &str) -> Result<Arc<AgentHandle>, ControlError> {
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| ControlError::AgentLoadError("No agent loader configured".to_string()))?;
        let handle = loader.load(identifier).await.map_err(|e| {
            tracing::warn!(agent = %identifier, error = %e, "Agent load failed");
            ControlError::AgentLoadError(e)
        })?;
        let handle = Arc::new(handle);
        self.install_agent(Arc::clone(&handle)).await;
        tracing::info!(agent = %handle.name(), llm_ready = handle.llm_ready(), "Agent loaded");
        Ok(handle)
    }

    /// 直接安装外部构建好的句柄；返回被替换的旧句柄
    pub async fn install_agent(&self, handle: Arc<AgentHandle>) -> Option<Arc<AgentHandle>> {
        self.lifecycle.replace_agent(handle).await
    }

    pub async fn current_agent(&self) -> Option<Arc<AgentHandle>> {
        self.slot.current().await
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.loader
            .as_ref()
            .map(|loader| loader.available())
            .unwrap_or_default()
    }

    pub async fn list_connections(&self) -> Result<Vec<ConnectionStatus>, ControlError> {
        self.dispatcher.list_connections().await
    }

    pub async fn connection_status(&self, connection: &str) -> Result<ConnectionStatus, ControlError> {
        self.dispatcher.connection_status(connection).await
    }

    pub async fn configure(
        &self,
        connection: &str,
        params: &Map<String, Value>,
    ) -> Result<(), ControlError> {
        self.dispatcher.configure(connection, params).await
    }

    pub async fn list_actions(&self, connection: &str) -> Result<Vec<ActionDescriptor>, ControlError> {
        self.dispatcher.list_actions(connection).await
    }
}
