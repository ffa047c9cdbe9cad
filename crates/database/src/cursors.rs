use {
    chrono::{DateTime, Utc},
    model::{
        eth::{Address, ChainId},
        events::Cursor,
        order::OrderId,
    },
    sqlx::PgConnection,
};

#[derive(Debug, sqlx::FromRow)]
struct Row {
    event_timestamp: DateTime<Utc>,
    order_id: Vec<u8>,
    event_id: String,
}

pub async fn load(
    ex: &mut PgConnection,
    chain_id: ChainId,
    collection: &Address,
) -> Result<Option<Cursor>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT event_timestamp, order_id, event_id
FROM relay_cursors
WHERE chain_id = $1 AND collection = $2
    ;"#;
    let row: Option<Row> = sqlx::query_as(QUERY)
        .bind(i64::try_from(chain_id.0).unwrap_or(i64::MAX))
        .bind(collection.as_slice())
        .fetch_optional(ex)
        .await?;
    Ok(row.map(|row| Cursor {
        timestamp: row.event_timestamp,
        order_id: OrderId::try_from(row.order_id.as_slice()).unwrap_or(OrderId::ZERO),
        event_id: row.event_id,
    }))
}

pub async fn save(
    ex: &mut PgConnection,
    chain_id: ChainId,
    collection: &Address,
    cursor: &Cursor,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO relay_cursors (chain_id, collection, event_timestamp, order_id, event_id)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (chain_id, collection)
DO UPDATE SET
    event_timestamp = EXCLUDED.event_timestamp,
    order_id = EXCLUDED.order_id,
    event_id = EXCLUDED.event_id,
    updated_at = now()
    ;"#;
    sqlx::query(QUERY)
        .bind(i64::try_from(chain_id.0).unwrap_or(i64::MAX))
        .bind(collection.as_slice())
        .bind(cursor.timestamp)
        .bind(cursor.order_id.as_slice())
        .bind(&cursor.event_id)
        .execute(ex)
        .await?;
    Ok(())
}
