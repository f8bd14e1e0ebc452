use std::sync::Arc;

use crate::counsel::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub payment_webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(engine: Engine, payment_webhook_secret: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            payment_webhook_secret: payment_webhook_secret.into(),
        }
    }
}
