//! The order-event log. The upstream indexer appends one row per
//! most-recent order event; the relay pages them in `(timestamp, event_id)`
//! order.

use {
    chrono::{DateTime, Utc},
    model::eth::{Address, ChainId},
    sqlx::PgConnection,
};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Row {
    pub event_id: String,
    pub order_id: Vec<u8>,
    pub kind: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub source_order: serde_json::Value,
    pub gas_usage: i64,
    pub event_timestamp: DateTime<Utc>,
}

/// Creates the table; the upstream indexer usually owns it, so this only
/// matters for self-contained deployments and tests.
pub async fn initialize(ex: &mut PgConnection) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
CREATE TABLE IF NOT EXISTS order_events (
    chain_id bigint NOT NULL,
    collection bytea NOT NULL,
    event_id text NOT NULL,
    order_id bytea NOT NULL,
    kind text NOT NULL,
    status text NOT NULL,
    payload jsonb NOT NULL,
    source text NOT NULL,
    source_order jsonb NOT NULL,
    gas_usage bigint NOT NULL,
    event_timestamp timestamptz NOT NULL,
    PRIMARY KEY (chain_id, collection, event_timestamp, event_id)
);
    "#;
    sqlx::query(QUERY).execute(ex).await?;
    Ok(())
}

/// One page strictly after `(after_timestamp, after_event_id)`, oldest
/// first.
pub async fn page(
    ex: &mut PgConnection,
    chain_id: ChainId,
    collection: &Address,
    after: Option<(DateTime<Utc>, &str)>,
    limit: i64,
) -> Result<Vec<Row>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT event_id, order_id, kind, status, payload, source, source_order, gas_usage, event_timestamp
FROM order_events
WHERE chain_id = $1
  AND collection = $2
  AND (event_timestamp, event_id) > ($3, $4)
ORDER BY event_timestamp ASC, event_id ASC
LIMIT $5
    ;"#;
    let (after_timestamp, after_event_id) = match after {
        Some((timestamp, event_id)) => (timestamp, event_id.to_string()),
        None => (DateTime::<Utc>::MIN_UTC, String::new()),
    };
    sqlx::query_as(QUERY)
        .bind(i64::try_from(chain_id.0).unwrap_or(i64::MAX))
        .bind(collection.as_slice())
        .bind(after_timestamp)
        .bind(after_event_id)
        .bind(limit)
        .fetch_all(ex)
        .await
}

pub async fn insert(
    ex: &mut PgConnection,
    chain_id: ChainId,
    collection: &Address,
    row: &Row,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO order_events (
    chain_id, collection, event_id, order_id, kind, status, payload,
    source, source_order, gas_usage, event_timestamp
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
ON CONFLICT DO NOTHING
    ;"#;
    sqlx::query(QUERY)
        .bind(i64::try_from(chain_id.0).unwrap_or(i64::MAX))
        .bind(collection.as_slice())
        .bind(&row.event_id)
        .bind(&row.order_id)
        .bind(&row.kind)
        .bind(&row.status)
        .bind(&row.payload)
        .bind(&row.source)
        .bind(&row.source_order)
        .bind(row.gas_usage)
        .bind(row.event_timestamp)
        .execute(ex)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, sqlx::Connection};

    #[tokio::test]
    #[ignore]
    async fn postgres_pages_in_stream_order() {
        let mut db = sqlx::PgConnection::connect("postgresql://").await.unwrap();
        initialize(&mut db).await.unwrap();
        let mut db = db.begin().await.unwrap();

        let chain = ChainId(1);
        let collection = Address::repeat_byte(0xcc);
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        // Same timestamp twice: the event id breaks the tie.
        for (event_id, offset) in [("b", 0), ("a", 0), ("c", 1)] {
            let row = Row {
                event_id: event_id.to_string(),
                order_id: vec![0x11; 32],
                kind: "added".to_string(),
                status: "active".to_string(),
                payload: serde_json::json!({}),
                source: "native".to_string(),
                source_order: serde_json::json!({}),
                gas_usage: 0,
                event_timestamp: base + chrono::Duration::seconds(offset),
            };
            insert(&mut db, chain, &collection, &row).await.unwrap();
        }

        let all = page(&mut db, chain, &collection, None, 10).await.unwrap();
        let ids: Vec<_> = all.iter().map(|row| row.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let after = page(&mut db, chain, &collection, Some((base, "a")), 10)
            .await
            .unwrap();
        let ids: Vec<_> = after.iter().map(|row| row.event_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
