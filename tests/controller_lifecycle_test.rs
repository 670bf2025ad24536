//! 控制器集成测试：生命周期、动作分发、Agent 替换

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hive::agent::AgentHandle;
use hive::config::AppConfig;
use hive::connections::{ActionDescriptor, Connection, ConnectionRegistry, EchoConnection};
use hive::core::{
    ActionRequest, ActionResult, AgentController, AgentTick, ControlError, ControllerBuilder,
    ErrorKind, LoopTiming,
};
use serde_json::{json, Map, Value};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

fn fast_timing() -> LoopTiming {
    LoopTiming {
        tick_interval: Duration::from_millis(5),
        fault_backoff: Duration::from_secs(60),
        stop_timeout: Duration::from_millis(300),
    }
}

fn controller_with_tick(tick: Arc<dyn AgentTick>) -> AgentController {
    ControllerBuilder::new(AppConfig::default())
        .with_tick(tick)
        .with_timing(fast_timing())
        .build()
}

fn agent(name: &str, registry: ConnectionRegistry) -> Arc<AgentHandle> {
    Arc::new(AgentHandle::new(name, registry))
}

async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// 记录每次 tick 所属的 Agent
#[derive(Default)]
struct RecordingTick {
    ticks: Mutex<Vec<String>>,
}

impl RecordingTick {
    fn count(&self, agent: &str) -> usize {
        self.ticks
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == agent)
            .count()
    }
}

#[async_trait]
impl AgentTick for RecordingTick {
    async fn tick(&self, agent: &AgentHandle, _stop: &CancellationToken) -> anyhow::Result<()> {
        self.ticks.lock().unwrap().push(agent.name().to_string());
        Ok(())
    }
}

/// 无视停止信号、每次 tick 阻塞固定时长
struct StubbornTick {
    hold: Duration,
    entered: AtomicUsize,
}

#[async_trait]
impl AgentTick for StubbornTick {
    async fn tick(&self, _agent: &AgentHandle, _stop: &CancellationToken) -> anyhow::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        Ok(())
    }
}

/// 统计同时处于 tick 中的工作任务数，并记录峰值
#[derive(Default)]
struct OverlapTick {
    live: AtomicUsize,
    peak: AtomicUsize,
    ticks: AtomicUsize,
}

#[async_trait]
impl AgentTick for OverlapTick {
    async fn tick(&self, _agent: &AgentHandle, _stop: &CancellationToken) -> anyhow::Result<()> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PanickingTick;

#[async_trait]
impl AgentTick for PanickingTick {
    async fn tick(&self, _agent: &AgentHandle, _stop: &CancellationToken) -> anyhow::Result<()> {
        panic!("loop body exploded");
    }
}

/// 统计调用次数的连接
struct CountingConnection {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for CountingConnection {
    fn name(&self) -> &str {
        "counter"
    }

    fn configure(&self, _params: &Map<String, Value>) -> bool {
        true
    }

    fn is_configured(&self, _verbose: bool) -> bool {
        true
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new("increment", "Count a call")]
    }

    async fn perform_action(&self, action: &str, _params: Value) -> Result<Option<Value>, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match action {
            "increment" => Ok(Some(json!(n))),
            "broken" => Err("wallet RPC unreachable".to_string()),
            _ => Ok(None),
        }
    }
}

/// 两个连接在同一个 Barrier 上会合；串行执行会死锁
struct RendezvousConnection {
    name: &'static str,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl Connection for RendezvousConnection {
    fn name(&self) -> &str {
        self.name
    }

    fn configure(&self, _params: &Map<String, Value>) -> bool {
        true
    }

    fn is_configured(&self, _verbose: bool) -> bool {
        true
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        Vec::new()
    }

    async fn perform_action(&self, _action: &str, _params: Value) -> Result<Option<Value>, String> {
        self.barrier.wait().await;
        Ok(Some(json!(self.name)))
    }
}

#[tokio::test]
async fn test_double_start_rejected() {
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    controller
        .install_agent(agent("example", ConnectionRegistry::new()))
        .await;

    controller.start().await.unwrap();
    assert!(controller.status().await.running);

    assert_eq!(controller.start().await, Err(ControlError::AlreadyRunning));
    let status = controller.status().await;
    assert!(status.running);
    assert_eq!(status.agent_name.as_deref(), Some("example"));
    assert!(status.run_id.is_some());

    controller.stop().await;
    assert!(!controller.status().await.running);
}

#[tokio::test]
async fn test_stop_when_idle_is_noop() {
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    controller.stop().await;
    controller
        .install_agent(agent("example", ConnectionRegistry::new()))
        .await;
    controller.stop().await;
    let status = controller.status().await;
    assert!(!status.running);
    assert!(!status.crashed);
}

#[tokio::test]
async fn test_start_without_agent() {
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    assert_eq!(controller.start().await, Err(ControlError::NoAgentLoaded));
    assert!(!controller.status().await.running);
}

#[tokio::test]
async fn test_stop_is_bounded_when_worker_ignores_signal() {
    let tick = Arc::new(StubbornTick {
        hold: Duration::from_secs(30),
        entered: AtomicUsize::new(0),
    });
    let controller = controller_with_tick(tick.clone());
    controller
        .install_agent(agent("example", ConnectionRegistry::new()))
        .await;

    controller.start().await.unwrap();
    wait_until(|| tick.entered.load(Ordering::SeqCst) > 0).await;

    let begin = Instant::now();
    controller.stop().await;
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert!(!controller.status().await.running);
}

#[tokio::test]
async fn test_late_worker_exit_does_not_clear_new_run() {
    let tick = Arc::new(StubbornTick {
        hold: Duration::from_millis(500),
        entered: AtomicUsize::new(0),
    });
    let controller = controller_with_tick(tick.clone());
    controller
        .install_agent(agent("example", ConnectionRegistry::new()))
        .await;

    controller.start().await.unwrap();
    wait_until(|| tick.entered.load(Ordering::SeqCst) > 0).await;
    controller.stop().await;

    controller.start().await.unwrap();
    // 被分离的旧任务在这段时间内退出
    tokio::time::sleep(Duration::from_millis(700)).await;
    let status = controller.status().await;
    assert!(status.running);
    assert!(!status.crashed);
    assert!(status.run_id.is_some());

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_start_stop_keeps_one_worker() {
    let tick = Arc::new(OverlapTick::default());
    let controller = Arc::new(controller_with_tick(tick.clone()));
    controller
        .install_agent(agent("example", ConnectionRegistry::new()))
        .await;

    for _ in 0..50 {
        let mut tasks = Vec::new();
        for i in 0..8 {
            let controller = Arc::clone(&controller);
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    let _ = controller.start().await;
                } else {
                    controller.stop().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    // 最后一轮确保确实跑过 tick
    let _ = controller.start().await;
    let before = tick.ticks.load(Ordering::SeqCst);
    wait_until(|| tick.ticks.load(Ordering::SeqCst) > before).await;
    controller.stop().await;

    assert!(!controller.status().await.running);
    assert_eq!(tick.live.load(Ordering::SeqCst), 0);
    assert_eq!(tick.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_crashed_status_drops_run_identity() {
    let controller = controller_with_tick(Arc::new(PanickingTick));
    controller
        .install_agent(agent("example", ConnectionRegistry::new()))
        .await;

    controller.start().await.unwrap();
    let mut status = controller.status().await;
    let deadline = Instant::now() + Duration::from_secs(2);
    while status.running && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
        status = controller.status().await;
    }

    assert!(!status.running);
    assert!(status.crashed);
    assert!(status.run_id.is_none());
    assert!(status.started_at.is_none());
    assert_eq!(status.agent_name.as_deref(), Some("example"));
}

#[tokio::test]
async fn test_dispatch_unknown_connection_has_no_side_effect() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ConnectionRegistry::new();
    registry.register(CountingConnection {
        calls: calls.clone(),
    });
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    controller.install_agent(agent("example", registry)).await;

    let result = controller.dispatch(ActionRequest::new("x", "y")).await;
    assert_eq!(
        result,
        ActionResult::Failure {
            kind: ErrorKind::ConnectionNotFound,
            message: "Connection x not found".to_string(),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let result = controller.dispatch(ActionRequest::new("counter", "increment")).await;
    assert_eq!(result, ActionResult::Success { result: json!(1) });
}

#[tokio::test]
async fn test_dispatch_provider_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ConnectionRegistry::new();
    registry.register(CountingConnection {
        calls: calls.clone(),
    });
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    controller.install_agent(agent("example", registry)).await;

    let result = controller.dispatch(ActionRequest::new("counter", "broken")).await;
    assert_eq!(
        result,
        ActionResult::Failure {
            kind: ErrorKind::ActionFailed,
            message: "wallet RPC unreachable".to_string(),
        }
    );

    let result = controller.dispatch(ActionRequest::new("counter", "silent")).await;
    assert!(!result.is_success());
    assert_eq!(result.error_kind(), Some(ErrorKind::ActionFailed));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_load_while_running_stops_old_loop_first() {
    let tick = Arc::new(RecordingTick::default());
    let controller = controller_with_tick(tick.clone());
    controller
        .install_agent(agent("first", ConnectionRegistry::new()))
        .await;

    controller.start().await.unwrap();
    wait_until(|| tick.count("first") > 0).await;

    let previous = controller
        .install_agent(agent("second", ConnectionRegistry::new()))
        .await;
    assert_eq!(previous.map(|a| a.name().to_string()).as_deref(), Some("first"));

    let status = controller.status().await;
    assert!(!status.running);
    assert_eq!(status.agent_name.as_deref(), Some("second"));

    // 旧循环已退出，不再产生 tick
    let first_ticks = tick.count("first");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tick.count("first"), first_ticks);
    assert_eq!(tick.count("second"), 0);

    controller.start().await.unwrap();
    wait_until(|| tick.count("second") > 0).await;
    assert!(tick.count("second") > 0);
    assert_eq!(tick.count("first"), first_ticks);
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_dispatches_do_not_serialize() {
    let barrier = Arc::new(Barrier::new(2));
    let mut registry = ConnectionRegistry::new();
    registry.register(RendezvousConnection {
        name: "left",
        barrier: barrier.clone(),
    });
    registry.register(RendezvousConnection {
        name: "right",
        barrier,
    });
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    controller.install_agent(agent("example", registry)).await;

    let both = async {
        tokio::join!(
            controller.dispatch(ActionRequest::new("left", "meet")),
            controller.dispatch(ActionRequest::new("right", "meet")),
        )
    };
    let (left, right) = tokio::time::timeout(Duration::from_secs(2), both)
        .await
        .expect("dispatches serialized on each other");
    assert_eq!(left, ActionResult::Success { result: json!("left") });
    assert_eq!(right, ActionResult::Success { result: json!("right") });
}

#[tokio::test]
async fn test_dispatch_while_loop_running() {
    let mut registry = ConnectionRegistry::new();
    registry.register(EchoConnection::new());
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));
    controller.install_agent(agent("example", registry)).await;
    controller.start().await.unwrap();

    let result = controller
        .dispatch(ActionRequest::new("echo", "echo").with_param("text", json!("gm")))
        .await;
    assert_eq!(result, ActionResult::Success { result: json!({"text": "gm"}) });
    assert!(controller.status().await.running);

    controller.stop().await;
}

#[tokio::test]
async fn test_connection_management() {
    let mut registry = ConnectionRegistry::new();
    registry.register(EchoConnection::new());
    registry.register(EchoConnection::gated("vault"));
    let controller = controller_with_tick(Arc::new(RecordingTick::default()));

    assert_eq!(
        controller.list_connections().await,
        Err(ControlError::NoAgentLoaded)
    );
    controller.install_agent(agent("example", registry)).await;

    let connections = controller.list_connections().await.unwrap();
    assert_eq!(connections.len(), 2);
    assert!(!controller.connection_status("vault").await.unwrap().configured);
    assert_eq!(
        controller.list_actions("vault").await,
        Err(ControlError::ConnectionNotConfigured("vault".into()))
    );

    let mut params = Map::new();
    params.insert("token".into(), json!("secret"));
    controller.configure("vault", &params).await.unwrap();
    assert!(controller.connection_status("vault").await.unwrap().configured);
    assert_eq!(controller.list_actions("vault").await.unwrap()[0].name, "echo");

    assert_eq!(
        controller.connection_status("twitter").await,
        Err(ControlError::ConnectionNotFound("twitter".into()))
    );
}
