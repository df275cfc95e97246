use tokio::sync::Mutex;

use crate::serv::mngr::CallRegistry;

#[derive(Default)]
pub struct AppState {
    pub registry: Mutex<CallRegistry>,
}
