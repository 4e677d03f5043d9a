use std::sync::Arc;

use crate::{auth::jwt::JwtService, config::AppConfig, gateway::QueueGateway};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<QueueGateway>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(config: AppConfig, gateway: QueueGateway, jwt: JwtService) -> Self {
        Self {
            config: Arc::new(config),
            gateway: Arc::new(gateway),
            jwt,
        }
    }
}
