pub mod mngr;
pub mod msgs;
pub mod ws_handler;

use msgs::*;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::app::AppState;
