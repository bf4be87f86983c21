use std::sync::Arc;

use csrfbank_core::BankContext;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<BankContext>,
}

impl AppState {
    pub fn new(ctx: BankContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }
}
