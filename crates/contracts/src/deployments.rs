//! Well-known deployment addresses per chain. The exchange and the
//! match-executor contract are operator-deployed and arrive via
//! configuration; everything here is third-party infrastructure at fixed,
//! publicly known addresses.

use alloy::primitives::{Address, address};

pub mod networks {
    pub const MAINNET: u64 = 1;
    pub const GOERLI: u64 = 5;
    pub const SEPOLIA: u64 = 11155111;
}

use networks::*;

/// The wrapped-native token for the chain.
pub fn wrapped_native(chain_id: u64) -> Option<Address> {
    match chain_id {
        MAINNET => Some(address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")),
        GOERLI => Some(address!("0xB4FBF271143F4FBf7B91A5ded31805e42b2208d6")),
        SEPOLIA => Some(address!("0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14")),
        _ => None,
    }
}

/// Seaport deploys at the same address on every chain.
pub fn seaport_v1_0() -> Address {
    address!("0x00000000006c3852cbEf3e08E8dF289169EdE581")
}

pub fn seaport_v1_4() -> Address {
    address!("0x00000000000001ad428e4906aE43D8F9852d0dD6")
}

pub fn seaport_v1_5() -> Address {
    address!("0x00000000000000ADc04C56Bf30aC9d3c0aAF14dC")
}

pub fn conduit_controller() -> Address {
    address!("0x00000000F9490004C11Cef243f5400493c00Ad63")
}
