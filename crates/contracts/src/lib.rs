//! Contract bindings for the on-chain collaborators: the exchange, the
//! match-executor contract that batches settlements, the token standards the
//! simulator needs to read, and the Seaport-family contracts reached through
//! the broker path.

use alloy::providers::DynProvider;

pub mod deployments;

alloy::sol! {
    #![sol(all_derives = true)]

    /// A single ERC-721 token inside an order.
    struct TokenInfo {
        uint256 tokenId;
        uint256 numTokens;
    }

    /// The tokens an order trades on one collection.
    struct OrderItem {
        address collection;
        TokenInfo[] tokens;
    }

    /// A maker order as the exchange settles it. `constraints` is
    /// `[numItems, startPrice, endPrice, startTime, endTime, nonce,
    /// maxGasPrice]`; `execParams` is `[complication, currency]`.
    struct MakerOrder {
        bool isSellOrder;
        address signer;
        uint256[] constraints;
        OrderItem[] nfts;
        address[] execParams;
        bytes extraParams;
        bytes sig;
    }

    /// The portion of a maker order covered by its EIP-712 signature. The
    /// exchange hashes this shape (the signature itself is excluded).
    struct SignableOrder {
        bool isSellOrder;
        address signer;
        uint256[] constraints;
        OrderItem[] nfts;
        address[] execParams;
        bytes extraParams;
    }

    /// One matched pair handed to the executor contract.
    struct MatchOrders {
        MakerOrder[] buys;
        MakerOrder[] sells;
    }

    /// An external marketplace call the broker performs before settling the
    /// native legs.
    struct ExternalCall {
        bytes data;
        uint256 value;
        address to;
    }

    /// The external fills plus the tokens those fills hand the broker.
    struct ExternalFulfillments {
        ExternalCall[] calls;
        OrderItem[] nftsToTransfer;
    }

    /// External fulfillments grouped with the native legs they fund.
    struct Batch {
        ExternalFulfillments externalFulfillments;
        MatchOrders[] matches;
    }

    #[sol(rpc)]
    interface IExchange {
        function matchExecutor() external view returns (address);
        function updateMatchExecutor(address executor) external;
        function userMinOrderNonce(address user) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IMatchExecutor {
        function initiator() external view returns (address);
        function executeNativeMatches(MatchOrders[] calldata matches) external;
        function executeBrokerMatches(Batch[] calldata batches) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    #[sol(rpc)]
    interface IWrappedNative {
        function deposit() external payable;
        function withdraw(uint256 value) external;

        event Deposit(address indexed dst, uint256 wad);
        event Withdrawal(address indexed src, uint256 wad);
    }

    #[sol(rpc)]
    interface IERC721 {
        function ownerOf(uint256 tokenId) external view returns (address);
    }

    #[sol(rpc)]
    interface IConduitController {
        function getConduit(bytes32 conduitKey) external view returns (address conduit, bool exists);
    }
}

pub type Exchange = IExchange::IExchangeInstance<DynProvider>;
pub type MatchExecutor = IMatchExecutor::IMatchExecutorInstance<DynProvider>;
pub type Erc20 = IERC20::IERC20Instance<DynProvider>;
pub type Erc721 = IERC721::IERC721Instance<DynProvider>;
pub type ConduitController = IConduitController::IConduitControllerInstance<DynProvider>;

impl From<&MakerOrder> for SignableOrder {
    fn from(order: &MakerOrder) -> Self {
        Self {
            isSellOrder: order.isSellOrder,
            signer: order.signer,
            constraints: order.constraints.clone(),
            nfts: order.nfts.clone(),
            execParams: order.execParams.clone(),
            extraParams: order.extraParams.clone(),
        }
    }
}

/// The EIP-712 domain of the exchange, used to sign match-executor orders.
pub fn eip712_domain(
    chain_id: u64,
    exchange: alloy::primitives::Address,
) -> alloy::sol_types::Eip712Domain {
    alloy::sol_types::eip712_domain! {
        name: "NftExchange",
        version: "1",
        chain_id: chain_id,
        verifying_contract: exchange,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy::{primitives::address, sol_types::SolStruct},
    };

    #[test]
    fn signature_does_not_contribute_to_signing_hash() {
        let order = MakerOrder {
            isSellOrder: true,
            signer: address!("0x00000000000000000000000000000000000000aa"),
            constraints: vec![],
            nfts: vec![],
            execParams: vec![],
            extraParams: Default::default(),
            sig: Default::default(),
        };
        let mut signed = order.clone();
        signed.sig = vec![0xde, 0xad].into();

        let domain = eip712_domain(1, address!("0x00000000000000000000000000000000000000ee"));
        assert_eq!(
            SignableOrder::from(&order).eip712_signing_hash(&domain),
            SignableOrder::from(&signed).eip712_signing_hash(&domain),
        );
    }

    #[test]
    fn signing_hash_depends_on_constraints() {
        let order = |nonce: u64| {
            let order = MakerOrder {
                isSellOrder: false,
                signer: address!("0x00000000000000000000000000000000000000aa"),
                constraints: vec![alloy::primitives::U256::from(nonce)],
                nfts: vec![],
                execParams: vec![],
                extraParams: Default::default(),
                sig: Default::default(),
            };
            SignableOrder::from(&order)
        };
        let domain = eip712_domain(1, address!("0x00000000000000000000000000000000000000ee"));
        assert_ne!(
            order(1).eip712_signing_hash(&domain),
            order(2).eip712_signing_hash(&domain),
        );
    }
}
