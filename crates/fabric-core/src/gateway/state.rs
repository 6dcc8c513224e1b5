//! Shared gateway state: the collaborators every control-plane method
//! and the WebSocket server loop both need a handle to.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bus::Bus;
use crate::cron::CronManager;
use crate::gateway::waiter::RunWaiter;
use crate::heartbeat::HeartbeatManager;
use crate::router::Router;
use crate::session::SessionManager;
use crate::store::Store;

/// Everything a [`crate::gateway::methods::Method`] impl needs, bundled so
/// registering the mandatory method families is one line per method
/// rather than threading five collaborators through each constructor.
pub struct GatewayState {
    pub bus: Arc<Bus>,
    pub store: Store,
    pub cron: Arc<CronManager>,
    pub heartbeat: Arc<HeartbeatManager>,
    pub router: Arc<dyn Router>,
    pub waiter: Arc<RunWaiter>,
    pub sessions: Mutex<SessionManager>,
    /// `session_key -> run_id` for in-flight `chat.send` calls, so
    /// `chat.abort` has something to cancel.
    pub active_chats: Mutex<HashMap<String, String>>,
}

impl GatewayState {
    pub fn new(
        bus: Arc<Bus>,
        store: Store,
        cron: Arc<CronManager>,
        heartbeat: Arc<HeartbeatManager>,
        router: Arc<dyn Router>,
        waiter: Arc<RunWaiter>,
        workspace: &std::path::Path,
    ) -> Self {
        Self {
            bus,
            store,
            cron,
            heartbeat,
            router,
            waiter,
            sessions: Mutex::new(SessionManager::new(workspace)),
            active_chats: Mutex::new(HashMap::new()),
        }
    }
}
