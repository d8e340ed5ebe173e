mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::RetryPolicy;
use crate::processor::TransitionHook;
use crate::providers::PaymentApiClient;
use crate::replay::ReplayGuard;
use crate::trust::IpAllowlist;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Per-provider shared secrets for webhook authentication.
/// An empty secret means "not configured".
#[derive(Debug, Clone, Default)]
pub struct ProviderSecrets {
    pub payment: String,
    pub marketplace: String,
}

/// Application state shared by every request handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub secrets: ProviderSecrets,
    /// Secondary trust signal, consulted only on signature failure.
    pub allowlist: Arc<IpAllowlist>,
    pub replay: ReplayGuard,
    /// Collaborator for fetching full payment details post-authentication.
    pub payment_api: Option<Arc<PaymentApiClient>>,
    /// Record rejected deliveries for forensic review.
    pub forensic_capture: bool,
    pub dev_mode: bool,
    pub retry: RetryPolicy,
    /// Post-transition side effects (stock, notifications). Each hook is
    /// failure-isolated from the core transition.
    pub hooks: Arc<Vec<Box<dyn TransitionHook>>>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(10).build(manager)
}
