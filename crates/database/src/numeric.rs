//! U256 values cross into Postgres as `numeric(78, 0)`.

use {
    bigdecimal::BigDecimal,
    model::eth::U256,
    std::str::FromStr,
};

pub fn u256_to_big_decimal(value: &U256) -> BigDecimal {
    // U256's Display is plain decimal, which BigDecimal parses exactly.
    BigDecimal::from_str(&value.to_string()).expect("decimal string is a valid BigDecimal")
}

pub fn big_decimal_to_u256(value: &BigDecimal) -> Option<U256> {
    if !value.is_integer() {
        return None;
    }
    U256::from_str(&value.with_scale(0).to_string()).ok()
}
