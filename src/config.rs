//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__CONTROLLER__STOP_TIMEOUT_SECS=10`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub controller: ControllerSection,
}

/// [app] 段：应用名、启动时自动加载的 Agent
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 启动时加载的 Agent 标识；未设置则等待调用方显式 load
    pub default_agent: Option<String>,
}

/// [controller] 段：后台循环与动作分发的时间参数
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSection {
    /// stop() 等待工作任务退出的上限（秒）
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// 单次 tick 出错后的退避时间（秒），可被 stop 打断
    #[serde(default = "default_fault_backoff_secs")]
    pub fault_backoff_secs: u64,
    /// 两次 tick 之间的间隔（毫秒）
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 单次动作执行超时（秒），0 表示不限
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_fault_backoff_secs() -> u64 {
    30
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_action_timeout_secs() -> u64 {
    60
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout_secs(),
            fault_backoff_secs: default_fault_backoff_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

impl ControllerSection {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_secs(self.fault_backoff_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        (self.action_timeout_secs > 0).then(|| Duration::from_secs(self.action_timeout_secs))
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
