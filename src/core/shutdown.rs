//! 优雅关闭
//!
//! 信号、stdin 关闭与 quit 命令都汇总到同一个 ShutdownManager；
//! 主循环退出后由 ShutdownCoordinator 依次执行清理（停止 Agent 循环），
//! 每个清理任务都有超时上限，进程不会因某个清理卡住而无法退出。

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::AgentController;

/// 进程退出的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// stdin 已关闭
    InputClosed,
    /// quit / exit 命令
    Quit,
}

/// 关闭信号：只记录第一次请求的原因
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: StdMutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求关闭；重复请求不会覆盖最初的原因
    pub fn request(&self, reason: ShutdownReason) {
        if let Ok(mut guard) = self.reason.lock() {
            if guard.is_none() {
                tracing::info!(?reason, "Shutdown requested");
                *guard = Some(reason);
            }
        }
        self.token.cancel();
    }

    /// 已请求关闭时返回原因
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|guard| *guard)
    }

    /// 等待关闭请求，返回其原因
    pub async fn wait(&self) -> Option<ShutdownReason> {
        self.token.cancelled().await;
        self.reason()
    }

    /// 监听 Ctrl+C 与 SIGTERM（仅 unix），收到后转为关闭请求
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.request(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            manager.request(ShutdownReason::Terminate);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "SIGTERM handler not installed"),
                }
            });
        }
    }
}

/// 退出前执行的清理任务
#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中使用的名称
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理，每个任务单独限时
pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    task_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            task_timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Box::new(task));
    }

    /// 执行全部清理，返回失败或超时的任务数
    pub async fn run_cleanup(&self) -> usize {
        let mut failed = 0;
        for task in &self.tasks {
            let name = task.name();
            match tokio::time::timeout(self.task_timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!(task = name, "Cleanup finished"),
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(task = name, error = %e, "Cleanup failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::warn!(
                        task = name,
                        timeout_ms = self.task_timeout.as_millis() as u64,
                        "Cleanup timed out"
                    );
                }
            }
        }
        failed
    }
}

/// 退出前停止 Agent 循环（stop 自身有超时，这里不会无限等待）
pub struct AgentLoopCleanup {
    controller: Arc<AgentController>,
}

impl AgentLoopCleanup {
    pub fn new(controller: Arc<AgentController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl ShutdownCleanup for AgentLoopCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.controller.stop().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "agent_loop"
    }
}
