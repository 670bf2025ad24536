//! Hive - 智能体生命周期控制与连接动作分发
//!
//! 入口：初始化日志与配置，加载示例 Agent，然后从 stdin 逐行读取命令并输出 JSON 结果。
//! 命令：start / stop / status / agents / load <name> / connections / connection <name> /
//! actions <conn> / configure <conn> <json> / dispatch <conn> <action> [json] / quit

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::agent::StaticAgentLoader;
use hive::config::{load_config, AppConfig};
use hive::connections::{ConnectionRegistry, EchoConnection};
use hive::core::{
    ActionRequest, AgentController, AgentLoopCleanup, ControlError, ControllerBuilder,
    ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

fn example_registry() -> ConnectionRegistry {
    let mut registry = ConnectionRegistry::new();
    registry.register(EchoConnection::new());
    registry.register(EchoConnection::gated("vault"));
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let loader = StaticAgentLoader::new().with_agent("example", example_registry);
    let controller = Arc::new(
        ControllerBuilder::new(cfg.clone())
            .with_loader(Arc::new(loader))
            .build(),
    );

    let default_agent = cfg
        .app
        .default_agent
        .clone()
        .unwrap_or_else(|| "example".to_string());
    controller
        .load_agent(&default_agent)
        .await
        .context("Failed to load default agent")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator =
        ShutdownCoordinator::new(cfg.controller.stop_timeout() + Duration::from_secs(1));
    coordinator.register(AgentLoopCleanup::new(Arc::clone(&controller)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    shutdown.request(ShutdownReason::InputClosed);
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match handle_command(&controller, line).await {
                    Some(reply) => println!("{reply}"),
                    None => {
                        shutdown.request(ShutdownReason::Quit);
                        break;
                    }
                }
            }
        }
    }

    let failed = coordinator.run_cleanup().await;
    tracing::info!(reason = ?shutdown.reason(), failed_cleanups = failed, "Hive exiting");
    Ok(())
}

/// 执行一行命令；返回 None 表示退出
async fn handle_command(controller: &AgentController, line: &str) -> Option<Value> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let reply = match cmd {
        "quit" | "exit" => return None,
        "start" => match controller.start().await {
            Ok(()) => success("Agent loop started"),
            Err(e) => failure(&e),
        },
        "stop" => {
            controller.stop().await;
            success("Agent loop stopped")
        }
        "status" => to_json(&controller.status().await),
        "agents" => json!({ "agents": controller.list_agents() }),
        "load" => match controller.load_agent(rest).await {
            Ok(agent) => json!({ "status": "success", "agent": agent.name() }),
            Err(e) => failure(&e),
        },
        "connections" => match controller.list_connections().await {
            Ok(connections) => json!({ "connections": connections }),
            Err(e) => failure(&e),
        },
        "connection" => match controller.connection_status(rest).await {
            Ok(status) => to_json(&status),
            Err(e) => failure(&e),
        },
        "actions" => match controller.list_actions(rest).await {
            Ok(actions) => json!({ "status": "success", "actions": actions }),
            Err(e) => failure(&e),
        },
        "configure" => {
            let (name, raw) = rest.split_once(' ').unwrap_or((rest, "{}"));
            match parse_params(raw) {
                Ok(params) => match controller.configure(name, &params).await {
                    Ok(()) => success(&format!("Connection {name} configured successfully")),
                    Err(e) => failure(&e),
                },
                Err(e) => invalid(&e),
            }
        }
        "dispatch" => {
            let mut parts = rest.splitn(3, ' ');
            let connection = parts.next().unwrap_or_default();
            let action = parts.next().unwrap_or_default();
            match parse_params(parts.next().unwrap_or("{}")) {
                Ok(params) => {
                    let request = ActionRequest {
                        connection: connection.to_string(),
                        action: action.to_string(),
                        params,
                    };
                    to_json(&controller.dispatch(request).await)
                }
                Err(e) => invalid(&e),
            }
        }
        other => invalid(&format!("Unknown command: {other}")),
    };
    Some(reply)
}

fn parse_params(raw: &str) -> Result<Map<String, Value>, String> {
    serde_json::from_str(raw.trim()).map_err(|e| format!("Invalid params JSON: {e}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| invalid(&e.to_string()))
}

fn success(message: &str) -> Value {
    json!({ "status": "success", "message": message })
}

fn failure(e: &ControlError) -> Value {
    json!({ "status": "error", "kind": e.kind(), "message": e.to_string() })
}

fn invalid(message: &str) -> Value {
    json!({ "status": "error", "message": message })
}
