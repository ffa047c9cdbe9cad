//! Wires the whole service together from the parsed arguments and runs it
//! until a shutdown signal drains it.

use {
    crate::{
        api::{self, ApiState, ExecutionControl, ExecutionStarter},
        arguments::{Arguments, Mode},
        domain::{AdmissionConfig, CollectionPipeline},
        infra::{cursors::PgCursors, events::pg::PgOrderEvents, snapshots::fs::FsSnapshots},
    },
    alloy::signers::local::PrivateKeySigner,
    anyhow::Context,
    contracts::{IExchange, IMatchExecutor, deployments},
    ethrpc::Rpc,
    execution::{
        broadcast::{Broadcast, ForkedBroadcaster, RelayBroadcaster},
        candidates::{on_chain::OnChainConduits, remote::RemoteSeaportApi},
        engine::{EngineConfig, ExecutionEngine},
        executor::Executor,
        info::ContractSet,
        nonces::NonceProvider,
        scheduler::BlockScheduler,
        state::{EthBalanceSimulator, EthStateReader},
    },
    model::eth::{ChainId, U256},
    order_store::OrderStore,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    tokio::sync::watch,
};

pub async fn run(args: Arguments) -> anyhow::Result<()> {
    observe::tracing_initialize(&args.log_filter, args.mode == Mode::Prod);
    tracing::info!("starting\n{args}");

    let db = database::connect(&args.database_url, 32)
        .await
        .context("failed to connect to the database")?;
    database::initialize(&db).await?;
    {
        let mut conn = db.acquire().await?;
        database::order_events::initialize(&mut conn).await?;
    }

    let rpc = Rpc::connect(&args.http_provider_url, &args.websocket_provider_url)
        .await
        .context("failed to connect to the chain node")?;
    let chain_id = ChainId(args.chain_id);
    anyhow::ensure!(
        rpc.chain_id() == chain_id,
        "node reports chain {} but {} is configured",
        rpc.chain_id(),
        chain_id,
    );

    let signer: PrivateKeySigner = args
        .initiator_key
        .parse()
        .context("invalid initiator key")?;
    let wrapped_native = deployments::wrapped_native(args.chain_id)
        .with_context(|| format!("no wrapped native token known for chain {chain_id}"))?;

    // Mismatched on-chain configuration is fatal: acting on it would build
    // transactions the exchange rejects.
    let exchange = IExchange::new(args.exchange_address, rpc.provider().clone());
    let executor_contract = IMatchExecutor::new(args.match_executor_address, rpc.provider().clone());
    let configured_executor = exchange.matchExecutor().call().await?;
    anyhow::ensure!(
        configured_executor == args.match_executor_address,
        "exchange uses match executor {configured_executor:#x}, configured {:#x}",
        args.match_executor_address,
    );
    let initiator = executor_contract.initiator().call().await?;
    anyhow::ensure!(
        initiator == signer.address(),
        "match executor expects initiator {initiator:#x}, signer is {:#x}",
        signer.address(),
    );

    let store = OrderStore::new();
    let factory = CollectionPipeline {
        chain_id,
        store: store.clone(),
        events: Arc::new(PgOrderEvents::new(db.clone())),
        snapshots: Arc::new(FsSnapshots::new(args.snapshot_dir.clone())),
        cursors: Arc::new(PgCursors(db.clone())),
        db: db.clone(),
        admission: AdmissionConfig {
            complication: args.complication_address,
            wrapped_native,
        },
    };

    let mut pipelines = HashMap::new();
    if args.matching_engine {
        for collection in &args.collections {
            pipelines.insert(*collection, factory.start(*collection));
        }
    }

    let execution = if args.execution_engine {
        let contracts = ContractSet {
            exchange: args.exchange_address,
            executor: args.match_executor_address,
            initiator: signer.address(),
            wrapped_native,
        };
        let nonces = Arc::new(NonceProvider::new(
            db.clone(),
            exchange.clone(),
            chain_id,
            args.match_executor_address,
        ));
        let executor = Executor::new(contracts, chain_id, signer.clone(), nonces);
        let broadcaster: Arc<dyn Broadcast> = if args.enable_forking {
            Arc::new(ForkedBroadcaster::new(rpc.clone(), signer.clone()))
        } else {
            let auth_key: PrivateKeySigner = args
                .flashbots_auth_key
                .as_deref()
                .context("a relay auth key is required unless forking is enabled")?
                .parse()
                .context("invalid relay auth key")?;
            Arc::new(RelayBroadcaster::new(
                rpc.clone(),
                reqwest::Client::new(),
                args.relay_url.clone(),
                signer.clone(),
                auth_key,
            ))
        };
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            db.clone(),
            Arc::new(EthStateReader::new(rpc.clone())),
            Arc::new(RemoteSeaportApi::new(
                reqwest::Client::new(),
                args.seaport_api_url.clone(),
                args.api_key.clone().unwrap_or_default(),
            )),
            Arc::new(OnChainConduits::new(&rpc)),
            Arc::new(EthBalanceSimulator::new(
                rpc.clone(),
                wrapped_native,
                vec![args.match_executor_address, signer.address()],
            )),
            broadcaster,
            executor,
            contracts,
            EngineConfig {
                priority_fee: U256::from(args.priority_fee_wei),
                ..Default::default()
            },
        ));
        let blocks = ethrpc::current_block::current_block_stream(rpc.clone())
            .await
            .context("failed to start the block stream")?;
        let scheduler_db = db.clone();
        let block_offset = args.block_offset;
        let start: ExecutionStarter = Arc::new(move |abort| {
            let mut scheduler = BlockScheduler::new(
                chain_id,
                scheduler_db.clone(),
                blocks.clone(),
                block_offset,
            );
            scheduler.register(engine.clone());
            tokio::spawn(scheduler.run(abort))
        });
        let (abort, abort_rx) = watch::channel(false);
        start(abort_rx);
        ExecutionControl::Running { abort, start }
    } else {
        ExecutionControl::Disabled
    };

    let state = Arc::new(ApiState {
        readonly: args.api_readonly,
        chain_id,
        store,
        pipelines: Mutex::new(pipelines),
        factory,
        execution: Mutex::new(execution),
    });

    let listener = tokio::net::TcpListener::bind(args.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_address))?;
    tracing::info!(address = %args.bind_address, "api listening");
    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Drain: flip every abort signal and let the lease holders unwind.
    for handle in state.pipelines.lock().unwrap().values() {
        handle.stop();
    }
    if let ExecutionControl::Running { abort, .. } = &*state.execution.lock().unwrap() {
        let _ = abort.send(true);
    }
    tracing::info!("drained");
    Ok(())
}
