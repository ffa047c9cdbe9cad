use {
    crate::numeric::{big_decimal_to_u256, u256_to_big_decimal},
    bigdecimal::BigDecimal,
    model::eth::{Address, ChainId, U256},
    sqlx::PgConnection,
};

/// Identifies the nonce record of one (match executor, exchange) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub chain_id: ChainId,
    pub match_executor: Address,
    pub exchange: Address,
}

/// Reads the current nonce, taking a row lock that serializes concurrent
/// allocations until the surrounding transaction ends.
pub async fn select_for_update(
    ex: &mut PgConnection,
    key: &Key,
) -> Result<Option<U256>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT nonce
FROM nonces
WHERE chain_id = $1 AND match_executor = $2 AND exchange = $3
FOR UPDATE
    ;"#;
    let nonce: Option<BigDecimal> = sqlx::query_scalar(QUERY)
        .bind(i64::try_from(key.chain_id.0).unwrap_or(i64::MAX))
        .bind(key.match_executor.as_slice())
        .bind(key.exchange.as_slice())
        .fetch_optional(ex)
        .await?;
    Ok(nonce.as_ref().and_then(big_decimal_to_u256))
}

/// Writes the advanced nonce. Must run inside the same transaction as
/// [`select_for_update`]; the transaction is the only source of monotonic
/// advancement.
pub async fn upsert(ex: &mut PgConnection, key: &Key, nonce: U256) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO nonces (chain_id, match_executor, exchange, nonce)
VALUES ($1, $2, $3, $4)
ON CONFLICT (chain_id, match_executor, exchange)
DO UPDATE SET nonce = EXCLUDED.nonce, updated_at = now()
    ;"#;
    sqlx::query(QUERY)
        .bind(i64::try_from(key.chain_id.0).unwrap_or(i64::MAX))
        .bind(key.match_executor.as_slice())
        .bind(key.exchange.as_slice())
        .bind(u256_to_big_decimal(&nonce))
        .execute(ex)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, sqlx::Connection};

    #[tokio::test]
    #[ignore]
    async fn postgres_nonce_advances() {
        let mut db = sqlx::PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();

        let key = Key {
            chain_id: ChainId(1),
            match_executor: Address::repeat_byte(0x11),
            exchange: Address::repeat_byte(0x22),
        };
        assert_eq!(select_for_update(&mut db, &key).await.unwrap(), None);

        upsert(&mut db, &key, U256::from(5)).await.unwrap();
        assert_eq!(
            select_for_update(&mut db, &key).await.unwrap(),
            Some(U256::from(5))
        );

        upsert(&mut db, &key, U256::from(6)).await.unwrap();
        assert_eq!(
            select_for_update(&mut db, &key).await.unwrap(),
            Some(U256::from(6))
        );
    }
}
