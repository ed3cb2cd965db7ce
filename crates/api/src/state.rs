//! Shared application state

use std::sync::Arc;

use crate::auth::JwtManager;
use crate::config::Config;
use crate::store::ChatStore;
use crate::websocket::Hub;

/// State handed to every route handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub jwt: JwtManager,
    pub hub: Hub,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ChatStore>, hub: Hub) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config: Arc::new(config),
            store,
            jwt,
            hub,
        }
    }
}
