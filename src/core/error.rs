//! 控制器错误类型与对外错误分类
//!
//! ControlError 是所有控制操作（start / stop / dispatch / configure / load）的统一错误；
//! ErrorKind 是其可序列化的「类别」投影，供传输层（HTTP / RPC / CLI）直接输出。

use serde::Serialize;
use thiserror::Error;

/// 控制器与分发器返回的错误；全部可在调用边界恢复，不会终止进程
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("No agent loaded")]
    NoAgentLoaded,

    #[error("Agent already running")]
    AlreadyRunning,

    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    /// 需要预先配置的连接未通过 is_configured(verbose=true) 检查
    #[error("Connection {0} is not configured")]
    ConnectionNotConfigured(String),

    /// 连接配置被提供方拒绝（configure 返回 false）
    #[error("Failed to configure {0}")]
    ConfigurationRejected(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Agent load error: {0}")]
    AgentLoadError(String),
}

/// 错误类别（序列化为 snake_case）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoAgentLoaded,
    AlreadyRunning,
    ConnectionNotFound,
    ConnectionNotConfigured,
    ConfigurationRejected,
    ActionFailed,
    AgentLoadError,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::NoAgentLoaded => ErrorKind::NoAgentLoaded,
            ControlError::AlreadyRunning => ErrorKind::AlreadyRunning,
            ControlError::ConnectionNotFound(_) => ErrorKind::ConnectionNotFound,
            ControlError::ConnectionNotConfigured(_) => ErrorKind::ConnectionNotConfigured,
            ControlError::ConfigurationRejected(_) => ErrorKind::ConfigurationRejected,
            ControlError::ActionFailed(_) => ErrorKind::ActionFailed,
            ControlError::AgentLoadError(_) => ErrorKind::AgentLoadError,
        }
    }
}
