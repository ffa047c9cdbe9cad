use {
    model::eth::Address,
    std::{net::SocketAddr, path::PathBuf},
    url::Url,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Dev,
    Prod,
}

#[derive(clap::Parser)]
pub struct Arguments {
    /// Address the control/health API binds to.
    #[clap(long, env = "API_PORT", default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    #[clap(long, env, default_value = "info,matching_engine=debug,execution=debug")]
    pub log_filter: String,

    #[clap(long, env = "MODE", value_enum, default_value = "dev")]
    pub mode: Mode,

    #[clap(long, env = "CHAIN_ID", default_value = "1")]
    pub chain_id: u64,

    #[clap(long, env = "CHAIN_NAME", default_value = "mainnet")]
    pub chain_name: String,

    #[clap(long, env = "HTTP_PROVIDER_URL", default_value = "http://localhost:8545")]
    pub http_provider_url: Url,

    #[clap(long, env = "WEBSOCKET_PROVIDER_URL", default_value = "ws://localhost:8546")]
    pub websocket_provider_url: Url,

    /// The shared Postgres instance backing cursors, nonces, leases and the
    /// executed-order store.
    #[clap(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Optional read replica for API reads.
    #[clap(long, env = "DATABASE_READONLY_URL", hide_env_values = true)]
    pub database_readonly_url: Option<String>,

    /// Private key of the EOA that signs executor-side orders and the final
    /// transaction.
    #[clap(long, env = "INITIATOR_KEY", hide_env_values = true)]
    pub initiator_key: String,

    #[clap(long, env = "MATCH_EXECUTOR_ADDRESS")]
    pub match_executor_address: Address,

    #[clap(long, env = "EXCHANGE_ADDRESS")]
    pub exchange_address: Address,

    /// The only complication accepted at admission.
    #[clap(long, env = "COMPLICATION_ADDRESS")]
    pub complication_address: Address,

    /// Key that authenticates bundle submissions to the private relay.
    #[clap(long, env = "FLASHBOTS_AUTH_KEY", hide_env_values = true)]
    pub flashbots_auth_key: Option<String>,

    #[clap(long, env, default_value = "https://relay.flashbots.net")]
    pub relay_url: Url,

    /// Key for the source marketplace's fulfillment-data API.
    #[clap(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[clap(long, env, default_value = "https://api.opensea.io/v2/")]
    pub seaport_api_url: Url,

    /// Directory the snapshot metadata and blobs are synced to.
    #[clap(long, env, default_value = "./snapshots")]
    pub snapshot_dir: PathBuf,

    /// Refuse all mutating API calls.
    #[clap(long, env = "API_READONLY", action = clap::ArgAction::Set, default_value = "false")]
    pub api_readonly: bool,

    /// Run the per-collection relay and matching pipelines.
    #[clap(long, env = "MATCHING_ENGINE", action = clap::ArgAction::Set, default_value = "true")]
    pub matching_engine: bool,

    /// Run the block-paced execution engine.
    #[clap(long, env = "EXECUTION_ENGINE", action = clap::ArgAction::Set, default_value = "true")]
    pub execution_engine: bool,

    /// Broadcast through the connected node instead of the private relay.
    #[clap(long, env = "ENABLE_FORKING", action = clap::ArgAction::Set, default_value = "false")]
    pub enable_forking: bool,

    #[clap(long, env = "DEBUG", action = clap::ArgAction::Set, default_value = "false")]
    pub debug: bool,

    /// Collections whose pipelines start at boot.
    #[clap(long, env = "COLLECTIONS", use_value_delimiter = true)]
    pub collections: Vec<Address>,

    /// How many blocks ahead the composed transaction aims.
    #[clap(long, env, default_value = "2")]
    pub block_offset: u64,

    /// Priority fee in wei offered on top of the projected base fee.
    #[clap(long, env, default_value = "3000000000")]
    pub priority_fee_wei: u64,
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "bind_address: {}", self.bind_address)?;
        writeln!(f, "mode: {:?}", self.mode)?;
        writeln!(f, "chain: {} ({})", self.chain_name, self.chain_id)?;
        writeln!(f, "http_provider_url: {}", self.http_provider_url)?;
        writeln!(f, "websocket_provider_url: {}", self.websocket_provider_url)?;
        writeln!(f, "match_executor_address: {:#x}", self.match_executor_address)?;
        writeln!(f, "exchange_address: {:#x}", self.exchange_address)?;
        writeln!(f, "complication_address: {:#x}", self.complication_address)?;
        writeln!(f, "relay_url: {}", self.relay_url)?;
        writeln!(f, "seaport_api_url: {}", self.seaport_api_url)?;
        writeln!(f, "snapshot_dir: {}", self.snapshot_dir.display())?;
        writeln!(f, "api_readonly: {}", self.api_readonly)?;
        writeln!(f, "matching_engine: {}", self.matching_engine)?;
        writeln!(f, "execution_engine: {}", self.execution_engine)?;
        writeln!(f, "enable_forking: {}", self.enable_forking)?;
        writeln!(f, "collections: {:?}", self.collections)?;
        writeln!(f, "block_offset: {}", self.block_offset)?;
        writeln!(f, "priority_fee_wei: {}", self.priority_fee_wei)
    }
}
