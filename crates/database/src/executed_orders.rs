use {
    crate::numeric::{big_decimal_to_u256, u256_to_big_decimal},
    bigdecimal::BigDecimal,
    model::{
        eth::{B256, U256},
        execution::ExecutionOrder,
        order::OrderId,
    },
    sqlx::PgConnection,
};

/// The durable form of [`ExecutionOrder::Executed`].
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExecutedOrder {
    pub order_id: Vec<u8>,
    pub block_number: i64,
    pub tx_hash: Vec<u8>,
    pub gas_used: i64,
    pub effective_gas_price: BigDecimal,
    pub block_timestamp: i64,
}

impl ExecutedOrder {
    pub fn new(order_id: &OrderId, record: &ExecutionOrder) -> Option<Self> {
        let ExecutionOrder::Executed {
            block,
            tx_hash,
            gas_used,
            effective_gas_price,
            block_timestamp,
        } = record
        else {
            return None;
        };
        Some(Self {
            order_id: order_id.to_vec(),
            block_number: i64::try_from(*block).ok()?,
            tx_hash: tx_hash.to_vec(),
            gas_used: i64::try_from(*gas_used).ok()?,
            effective_gas_price: u256_to_big_decimal(effective_gas_price),
            block_timestamp: i64::try_from(*block_timestamp).ok()?,
        })
    }

    pub fn record(&self) -> Option<ExecutionOrder> {
        Some(ExecutionOrder::Executed {
            block: u64::try_from(self.block_number).ok()?,
            tx_hash: B256::try_from(self.tx_hash.as_slice()).ok()?,
            gas_used: u64::try_from(self.gas_used).ok()?,
            effective_gas_price: big_decimal_to_u256(&self.effective_gas_price)
                .unwrap_or(U256::ZERO),
            block_timestamp: u64::try_from(self.block_timestamp).ok()?,
        })
    }
}

/// Inserts executed-order records in one batch. A re-executed order id is a
/// bug upstream (an order can only be filled once); the insert keeps the
/// first record.
pub async fn save_all(
    ex: &mut PgConnection,
    records: &[ExecutedOrder],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO executed_orders (
    order_id, block_number, tx_hash, gas_used, effective_gas_price, block_timestamp
)
SELECT * FROM UNNEST($1::bytea[], $2::bigint[], $3::bytea[], $4::bigint[], $5::numeric[], $6::bigint[])
ON CONFLICT (order_id) DO NOTHING
    ;"#;
    if records.is_empty() {
        return Ok(());
    }
    sqlx::query(QUERY)
        .bind(records.iter().map(|r| r.order_id.clone()).collect::<Vec<_>>())
        .bind(records.iter().map(|r| r.block_number).collect::<Vec<_>>())
        .bind(records.iter().map(|r| r.tx_hash.clone()).collect::<Vec<_>>())
        .bind(records.iter().map(|r| r.gas_used).collect::<Vec<_>>())
        .bind(
            records
                .iter()
                .map(|r| r.effective_gas_price.clone())
                .collect::<Vec<_>>(),
        )
        .bind(records.iter().map(|r| r.block_timestamp).collect::<Vec<_>>())
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn load(
    ex: &mut PgConnection,
    order_id: &OrderId,
) -> Result<Option<ExecutedOrder>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT order_id, block_number, tx_hash, gas_used, effective_gas_price, block_timestamp
FROM executed_orders
WHERE order_id = $1
    ;"#;
    sqlx::query_as(QUERY)
        .bind(order_id.as_slice())
        .fetch_optional(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {super::*, sqlx::Connection};

    #[test]
    fn round_trips_executed_record() {
        let id = OrderId::repeat_byte(0x11);
        let record = ExecutionOrder::Executed {
            block: 100,
            tx_hash: B256::repeat_byte(0x22),
            gas_used: 21_000,
            effective_gas_price: U256::from(13_000_000_000u64),
            block_timestamp: 1_700_000_000,
        };
        let row = ExecutedOrder::new(&id, &record).unwrap();
        assert_eq!(row.record(), Some(record));
    }

    #[test]
    fn non_executed_records_are_not_persisted() {
        let id = OrderId::ZERO;
        assert!(ExecutedOrder::new(&id, &ExecutionOrder::Pending { block: 1 }).is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_save_and_load() {
        let mut db = sqlx::PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();

        let id = OrderId::repeat_byte(0x33);
        let record = ExecutionOrder::Executed {
            block: 7,
            tx_hash: B256::repeat_byte(0x44),
            gas_used: 90_000,
            effective_gas_price: U256::from(1u64),
            block_timestamp: 1,
        };
        let row = ExecutedOrder::new(&id, &record).unwrap();
        save_all(&mut db, std::slice::from_ref(&row)).await.unwrap();
        // Double inclusion keeps the first record.
        save_all(&mut db, std::slice::from_ref(&row)).await.unwrap();

        let loaded = load(&mut db, &id).await.unwrap().unwrap();
        assert_eq!(loaded.record(), Some(record));
    }
}
