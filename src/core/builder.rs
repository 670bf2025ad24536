//! 控制器构建器：统一的初始化逻辑
//!
//! 从 AppConfig 读取时间参数，可选注入 tick 逻辑与 Agent 加载器；
//! CLI 与测试共用同一套构建路径。

use std::sync::Arc;

use crate::agent::{AgentLoader, AgentSlot};
use crate::config::AppConfig;
use crate::core::{
    ActionDispatcher, AgentController, AgentTick, IdleTick, LifecycleController, LoopTiming,
};

/// 控制器构建器
pub struct ControllerBuilder {
    config: AppConfig,
    tick: Option<Arc<dyn AgentTick>>,
    loader: Option<Arc<dyn AgentLoader>>,
    timing: Option<LoopTiming>,
}

impl ControllerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            tick: None,
            loader: None,
            timing: None,
        }
    }

    /// 设置每个 tick 执行的 Agent 逻辑（默认 IdleTick）
    pub fn with_tick(mut self, tick: Arc<dyn AgentTick>) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn AgentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// 覆盖配置中的循环时间参数（测试中用毫秒级参数）
    pub fn with_timing(mut self, timing: LoopTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn build(self) -> AgentController {
        let slot = Arc::new(AgentSlot::new());
        let timing = self
            .timing
            .unwrap_or_else(|| LoopTiming::from(&self.config.controller));
        let tick = self
            .tick
            .unwrap_or_else(|| Arc::new(IdleTick::default()) as Arc<dyn AgentTick>);

        let lifecycle = LifecycleController::new(Arc::clone(&slot), tick, timing);
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&slot), self.config.controller.action_timeout());

        AgentController::from_parts(slot, lifecycle, dispatcher, self.loader)
    }
}
