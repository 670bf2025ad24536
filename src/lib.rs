//! Hive - 智能体生命周期控制与连接动作分发
//!
//! 模块划分：
//! - **agent**: Agent 句柄、当前句柄的原子替换、外部加载器接口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **connections**: 连接（能力提供方）trait、注册表与 Echo 连接
//! - **core**: 生命周期控制器、动作分发器、控制器门面、优雅关闭
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod connections;
pub mod core;
pub mod observability;

pub use agent::{AgentHandle, AgentLoader, StaticAgentLoader};
pub use crate::core::{ActionRequest, ActionResult, AgentController, ControlError, ControllerBuilder};
