pub mod msg_bus;
pub mod signaling_msgs;

use crate::debug;
