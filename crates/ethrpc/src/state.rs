//! Typed reads of the chain state the simulator seeds itself from. All reads
//! are pinned to a block number so that a batch taken for one execution
//! attempt is internally consistent.

use {
    crate::{Error, Rpc},
    alloy::{
        eips::BlockId,
        providers::Provider,
    },
    contracts::{IERC20, IERC721},
    model::eth::{Address, U256},
};

pub async fn erc721_owner(
    rpc: &Rpc,
    collection: Address,
    token_id: U256,
    block: u64,
) -> Result<Address, Error> {
    let contract = IERC721::new(collection, rpc.provider().clone());
    Ok(contract
        .ownerOf(token_id)
        .block(BlockId::number(block))
        .call()
        .await?)
}

pub async fn erc20_balance(
    rpc: &Rpc,
    token: Address,
    owner: Address,
    block: u64,
) -> Result<U256, Error> {
    let contract = IERC20::new(token, rpc.provider().clone());
    Ok(contract
        .balanceOf(owner)
        .block(BlockId::number(block))
        .call()
        .await?)
}

pub async fn erc20_allowance(
    rpc: &Rpc,
    token: Address,
    owner: Address,
    spender: Address,
    block: u64,
) -> Result<U256, Error> {
    let contract = IERC20::new(token, rpc.provider().clone());
    Ok(contract
        .allowance(owner, spender)
        .block(BlockId::number(block))
        .call()
        .await?)
}

pub async fn native_balance(rpc: &Rpc, account: Address, block: u64) -> Result<U256, Error> {
    Ok(rpc
        .provider()
        .get_balance(account)
        .block_id(BlockId::number(block))
        .await?)
}
