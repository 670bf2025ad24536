pub mod echo;
pub mod registry;

pub use echo::EchoConnection;
pub use registry::{
    ActionDescriptor, ActionParameter, Connection, ConnectionRegistry, ConnectionStatus,
};
