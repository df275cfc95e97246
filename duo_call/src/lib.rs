pub mod call;
pub mod config;
pub mod error;
pub mod msg_center;
pub mod server;
pub mod utils;

pub use call::{CallState, Coordinator, Role, Session};
pub use error::{CallError, Result};
pub use msg_center::msg_bus::{CallHandle, CallStatus};
