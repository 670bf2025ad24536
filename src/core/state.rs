//! 状态投影：ControllerStatus
//!
//! 传输层只拿到这份轻量快照（是否运行、当前 Agent、是否崩溃、本轮循环标识），
//! 内部的 token / JoinHandle 不对外暴露。

use serde::Serialize;

/// 控制器状态快照
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub running: bool,
    pub agent_name: Option<String>,
    /// 上一轮循环因未捕获故障退出（未经 stop）；下一次 start 成功后复位
    pub crashed: bool,
    pub run_id: Option<String>,
    /// 本轮循环启动时间（毫秒时间戳）
    pub started_at: Option<i64>,
}
