use std::sync::Arc;

use crate::config::Config;
use crate::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(services: Services, config: Arc<Config>) -> Self {
        Self { services, config }
    }
}
