//! 后台循环生命周期：Idle -> Running -> Idle
//!
//! 同一时刻最多一个工作任务；start / stop / 替换 Agent 在同一把锁上串行化。
//! 运行状态用「轮次编号」表示（0 = Idle），工作任务退出时只清除自己那一轮，
//! 超时被分离的旧任务晚退出也不会把新一轮标成停止。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentHandle, AgentSlot};
use crate::config::ControllerSection;
use crate::core::ControlError;

/// 每个 tick 执行的 Agent 逻辑（外部注入）；返回 Err 视为瞬时故障，循环退避后继续
#[async_trait]
pub trait AgentTick: Send + Sync {
    async fn tick(&self, agent: &AgentHandle, stop: &CancellationToken) -> anyhow::Result<()>;

    /// 每轮循环开始前调用一次（在 start 持锁期间，首个 tick 之前）
    fn on_run_start(&self, _agent: &AgentHandle) {}
}

/// 默认 tick：未接入循环逻辑时每轮只记录一次日志
#[derive(Debug, Default)]
pub struct IdleTick {
    logged: AtomicBool,
}

#[async_trait]
impl AgentTick for IdleTick {
    fn on_run_start(&self, _agent: &AgentHandle) {
        self.logged.store(false, Ordering::Relaxed);
    }

    async fn tick(&self, agent: &AgentHandle, _stop: &CancellationToken) -> anyhow::Result<()> {
        if !self.logged.swap(true, Ordering::Relaxed) {
            tracing::info!(agent = %agent.name(), "No loop logic installed, agent loop idling");
        }
        Ok(())
    }
}

/// 循环时间参数
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub tick_interval: Duration,
    pub fault_backoff: Duration,
    pub stop_timeout: Duration,
}

impl From<&ControllerSection> for LoopTiming {
    fn from(section: &ControllerSection) -> Self {
        Self {
            tick_interval: section.tick_interval(),
            fault_backoff: section.fault_backoff(),
            stop_timeout: section.stop_timeout(),
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from(&ControllerSection::default())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RunInfo {
    pub run_id: Uuid,
    pub started_at: i64,
}

/// 工作任务与控制器共享的状态（无锁读取）
#[derive(Default)]
struct LoopShared {
    /// 正在运行的轮次，0 表示 Idle
    active_epoch: AtomicU64,
    /// 最近一次 start 分配的轮次
    last_epoch: AtomicU64,
    /// 最近一次崩溃的轮次
    crashed_epoch: AtomicU64,
    run: StdMutex<Option<RunInfo>>,
}

/// 仅在持锁时访问：停止信号与工作任务句柄
struct LoopState {
    stop_signal: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

/// 生命周期控制器：绑定 AgentSlot 中的当前 Agent 管理唯一的后台循环
pub struct LifecycleController {
    slot: Arc<AgentSlot>,
    tick: Arc<dyn AgentTick>,
    timing: LoopTiming,
    shared: Arc<LoopShared>,
    state: Mutex<LoopState>,
}

impl LifecycleController {
    pub fn new(slot: Arc<AgentSlot>, tick: Arc<dyn AgentTick>, timing: LoopTiming) -> Self {
        Self {
            slot,
            tick,
            timing,
            shared: Arc::new(LoopShared::default()),
            state: Mutex::new(LoopState {
                stop_signal: CancellationToken::new(),
                worker: None,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.active_epoch.load(Ordering::SeqCst) != 0
    }

    /// 最近一轮循环是否因未捕获故障退出（而非 stop）
    pub fn crashed(&self) -> bool {
        let crashed = self.shared.crashed_epoch.load(Ordering::SeqCst);
        crashed != 0 && crashed == self.shared.last_epoch.load(Ordering::SeqCst) && !self.is_running()
    }

    pub(crate) fn run_info(&self) -> Option<RunInfo> {
        self.shared.run.lock().ok().and_then(|guard| guard.clone())
    }

    /// 启动后台循环；立即返回，不等待首个 tick
    pub async fn start(&self) -> Result<(), ControlError> {
        let mut state = self.state.lock().await;
        let agent = self.slot.current().await.ok_or(ControlError::NoAgentLoaded)?;
        if self.is_running() {
            return Err(ControlError::AlreadyRunning);
        }

        // 先登记停止信号，再发布轮次
        let stop = CancellationToken::new();
        state.stop_signal = stop.clone();
        let epoch = self.shared.last_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let run = RunInfo {
            run_id: Uuid::new_v4(),
            started_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Ok(mut guard) = self.shared.run.lock() {
            *guard = Some(run.clone());
        }
        self.tick.on_run_start(&agent);
        self.shared.active_epoch.store(epoch, Ordering::SeqCst);

        let worker = tokio::spawn(run_worker(
            Arc::clone(&agent),
            Arc::clone(&self.tick),
            stop,
            self.timing,
            Arc::clone(&self.shared),
            epoch,
            run.run_id,
        ));
        state.worker = Some(worker);

        tracing::info!(agent = %agent.name(), run_id = %run.run_id, "Agent loop started");
        Ok(())
    }

    /// 停止后台循环；Idle 时为空操作。最多等待 stop_timeout，超时则分离工作任务
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    /// 替换当前 Agent：若循环在跑，先停掉旧循环再换句柄；新 Agent 需要显式 start
    pub async fn replace_agent(&self, handle: Arc<AgentHandle>) -> Option<Arc<AgentHandle>> {
        let mut state = self.state.lock().await;
        if self.is_running() {
            tracing::info!(next = %handle.name(), "Stopping agent loop before swapping agent");
            self.stop_locked(&mut state).await;
        }
        let previous = self.slot.replace(handle).await;
        if let Some(ref old) = previous {
            tracing::info!(previous = %old.name(), "Agent replaced");
        }
        previous
    }

    async fn stop_locked(&self, state: &mut LoopState) {
        let worker = state.worker.take();
        if !self.is_running() {
            return;
        }

        state.stop_signal.cancel();
        let run_id = self.run_info().map(|run| run.run_id.to_string()).unwrap_or_default();
        if let Some(worker) = worker {
            match tokio::time::timeout(self.timing.stop_timeout, worker).await {
                Ok(Ok(())) => {
                    tracing::info!(run_id = %run_id, "Agent loop joined");
                }
                Ok(Err(e)) => {
                    tracing::warn!(run_id = %run_id, error = %e, "Agent loop task ended abnormally");
                }
                Err(_) => {
                    tracing::warn!(
                        run_id = %run_id,
                        timeout_ms = self.timing.stop_timeout.as_millis() as u64,
                        "Agent loop did not acknowledge stop in time, detaching worker"
                    );
                }
            }
        }

        let mut run = self.shared.run.lock().ok();
        self.shared.active_epoch.store(0, Ordering::SeqCst);
        if let Some(guard) = run.as_mut() {
            **guard = None;
        }
    }
}

async fn run_worker(
    agent: Arc<AgentHandle>,
    tick: Arc<dyn AgentTick>,
    stop: CancellationToken,
    timing: LoopTiming,
    shared: Arc<LoopShared>,
    epoch: u64,
    run_id: Uuid,
) {
    let outcome = AssertUnwindSafe(worker_loop(&agent, tick.as_ref(), &stop, timing))
        .catch_unwind()
        .await;

    // 持 run 锁完成「记崩溃 + 清轮次 + 清运行信息」，新一轮 start 写入的运行信息不会被旧任务抹掉
    let mut run = shared.run.lock().ok();
    if let Err(payload) = outcome {
        if stop.is_cancelled() {
            tracing::warn!(
                agent = %agent.name(),
                run_id = %run_id,
                error = %panic_message(payload.as_ref()),
                "Agent loop panicked after stop was requested"
            );
        } else {
            tracing::error!(
                agent = %agent.name(),
                run_id = %run_id,
                error = %panic_message(payload.as_ref()),
                "Error in agent loop, loop terminated"
            );
            shared.crashed_epoch.store(epoch, Ordering::SeqCst);
        }
    }

    let cleared = shared
        .active_epoch
        .compare_exchange(epoch, 0, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();
    if cleared {
        if let Some(guard) = run.as_mut() {
            **guard = None;
        }
    }
    drop(run);
    tracing::info!(agent = %agent.name(), run_id = %run_id, "Agent loop stopped");
}

async fn worker_loop(
    agent: &AgentHandle,
    tick: &dyn AgentTick,
    stop: &CancellationToken,
    timing: LoopTiming,
) {
    while !stop.is_cancelled() {
        let pause = match tick.tick(agent, stop).await {
            Ok(()) => timing.tick_interval,
            Err(e) => {
                tracing::error!(
                    agent = %agent.name(),
                    error = %e,
                    backoff_secs = timing.fault_backoff.as_secs(),
                    "Error in agent action"
                );
                timing.fault_backoff
            }
        };

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// 从 panic 负载中取出可读消息
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
