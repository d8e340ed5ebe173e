use rusqlite::Connection;

/// Initialize the database schema.
///
/// Uniqueness is enforced at the database level everywhere the pipeline
/// relies on idempotent inserts: a read-then-write check would race under
/// concurrent deliveries of the same event.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        -- Orders (owned by the storefront subsystem; this pipeline only
        -- mutates status and correlation fields)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            external_reference TEXT NOT NULL UNIQUE,
            external_order_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'paid', 'rejected', 'cancelled', 'refunded', 'charged_back')),
            payment_id TEXT,
            shipping_status TEXT,
            cancellation_reason TEXT,
            paid_at INTEGER,
            cancelled_at INTEGER,
            refunded_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_payment ON orders(payment_id);

        -- Delivery ledger: every accepted inbound event, exactly once.
        -- raw_body holds the exact bytes received; never re-serialized.
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL CHECK (provider IN ('payment', 'marketplace')),
            external_event_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            raw_body BLOB NOT NULL,
            headers TEXT NOT NULL,
            trust TEXT NOT NULL DEFAULT 'signature'
                CHECK (trust IN ('signature', 'ip-allowlist', 'unverified', 'forensic')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processed', 'failed')),
            created_at INTEGER NOT NULL,
            processed_at INTEGER,
            UNIQUE(provider, external_event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_deliveries_status ON webhook_deliveries(status);
        CREATE INDEX IF NOT EXISTS idx_deliveries_provider_time ON webhook_deliveries(provider, created_at DESC);

        -- Replay dedup markers (durable tier). Purged past expires_at.
        CREATE TABLE IF NOT EXISTS replay_records (
            idempotency_key TEXT PRIMARY KEY,
            first_seen_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_replay_expires ON replay_records(expires_at);

        -- Retry descriptors for failed processing. One row per delivery.
        CREATE TABLE IF NOT EXISTS retry_queue (
            id TEXT PRIMARY KEY,
            delivery_id TEXT NOT NULL UNIQUE REFERENCES webhook_deliveries(id) ON DELETE CASCADE,
            last_error TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'scheduled' CHECK (state IN ('scheduled', 'exhausted')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_retry_due ON retry_queue(state, next_attempt_at);
        "#,
    )?;
    Ok(())
}
