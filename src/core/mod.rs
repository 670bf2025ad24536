//! 核心控制层：错误、状态投影、生命周期、动作分发、控制器构建与优雅关闭

pub mod builder;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod shutdown;
pub mod state;

pub use builder::ControllerBuilder;
pub use controller::AgentController;
pub use dispatcher::{ActionDispatcher, ActionRequest, ActionResult};
pub use error::{ControlError, ErrorKind};
pub use lifecycle::{AgentTick, IdleTick, LifecycleController, LoopTiming};
pub use shutdown::{AgentLoopCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::ControllerStatus;
