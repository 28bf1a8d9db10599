pub mod auth;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod models;
pub mod notify;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use enrollment::{EnrollmentService, RetryPolicy};
use notify::Notifier;
use store::Store;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub enrollments: Arc<EnrollmentService>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the enrollment service to `store` using the retry settings from `config`.
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: Config) -> Self {
        let retry = RetryPolicy {
            max_retries: config.tx_max_retries,
            backoff: config.tx_retry_backoff,
        };
        Self {
            enrollments: Arc::new(EnrollmentService::new(store.clone(), retry)),
            store,
            notifier,
            config: Arc::new(config),
        }
    }
}
