//! Postgres persistence for the durable side of the pipeline: executed-order
//! records, nonce records, relay cursors, and the advisory-lock leases that
//! select one active instance per resource.

use sqlx::{PgPool, postgres::PgPoolOptions};

pub mod cursors;
pub mod executed_orders;
pub mod leases;
pub mod nonces;
pub mod numeric;
pub mod order_events;

pub type Error = sqlx::Error;

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

/// Creates the tables this crate writes to, if they don't exist yet.
pub async fn initialize(pool: &PgPool) -> Result<(), Error> {
    const QUERIES: &[&str] = &[
        r#"
CREATE TABLE IF NOT EXISTS executed_orders (
    order_id bytea PRIMARY KEY,
    block_number bigint NOT NULL,
    tx_hash bytea NOT NULL,
    gas_used bigint NOT NULL,
    effective_gas_price numeric(78, 0) NOT NULL,
    block_timestamp bigint NOT NULL,
    created_at timestamptz NOT NULL DEFAULT now()
);
        "#,
        r#"
CREATE TABLE IF NOT EXISTS nonces (
    chain_id bigint NOT NULL,
    match_executor bytea NOT NULL,
    exchange bytea NOT NULL,
    nonce numeric(78, 0) NOT NULL,
    created_at timestamptz NOT NULL DEFAULT now(),
    updated_at timestamptz NOT NULL DEFAULT now(),
    PRIMARY KEY (chain_id, match_executor, exchange)
);
        "#,
        r#"
CREATE TABLE IF NOT EXISTS relay_cursors (
    chain_id bigint NOT NULL,
    collection bytea NOT NULL,
    event_timestamp timestamptz NOT NULL,
    order_id bytea NOT NULL,
    event_id text NOT NULL,
    updated_at timestamptz NOT NULL DEFAULT now(),
    PRIMARY KEY (chain_id, collection)
);
        "#,
    ];
    for query in QUERIES {
        sqlx::query(query).execute(pool).await?;
    }
    Ok(())
}
