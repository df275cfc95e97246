pub mod data;
pub mod rtc;
pub mod signal_cli;

use crate::{debug, error, info, warn};

use url::Url;
