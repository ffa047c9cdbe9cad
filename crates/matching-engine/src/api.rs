//! The control and health surface. Thin by design: JSON in, JSON out, all
//! real state lives in the store and the pipeline handles.

use {
    crate::domain::{CollectionPipeline, collection::PipelineHandle, health::CollectionReport},
    axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        routing::{delete, get, post, put},
    },
    model::eth::{Address, ChainId},
    order_store::OrderStore,
    serde::Serialize,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    tokio::sync::watch,
};

/// Spawns the execution side (scheduler plus engine) under a fresh abort
/// signal.
pub type ExecutionStarter =
    Arc<dyn Fn(watch::Receiver<bool>) -> tokio::task::JoinHandle<()> + Send + Sync>;

pub enum ExecutionControl {
    /// Not configured in this process.
    Disabled,
    Stopped {
        start: ExecutionStarter,
    },
    Running {
        abort: watch::Sender<bool>,
        start: ExecutionStarter,
    },
}

pub struct ApiState {
    pub readonly: bool,
    pub chain_id: ChainId,
    pub store: OrderStore,
    pub pipelines: Mutex<HashMap<Address, PipelineHandle>>,
    pub factory: CollectionPipeline,
    pub execution: Mutex<ExecutionControl>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/matching/collection/{address}", put(start_collection))
        .route("/matching/collection/{address}", delete(stop_collection))
        .route("/matching/order/{id}", post(force_match))
        .route("/execution", put(start_execution))
        .route("/execution", delete(stop_execution))
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    chain_id: ChainId,
    orders: usize,
    active_orders: usize,
    matches: usize,
    collections: HashMap<String, CollectionReport>,
    execution: ExecutionHealth,
}

#[derive(Serialize)]
struct ExecutionHealth {
    running: bool,
    recent_blocks: Vec<model::execution::ExecutionBlock>,
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<Health> {
    let stats = state.store.stats();
    let collections = state
        .pipelines
        .lock()
        .unwrap()
        .iter()
        .map(|(address, handle)| (format!("{address:#x}"), handle.report()))
        .collect();
    let running = matches!(
        &*state.execution.lock().unwrap(),
        ExecutionControl::Running { .. }
    );
    Json(Health {
        chain_id: state.chain_id,
        orders: stats.orders,
        active_orders: stats.active_orders,
        matches: stats.matches,
        collections,
        execution: ExecutionHealth {
            running,
            recent_blocks: state.store.recent_blocks(),
        },
    })
}

async fn metrics() -> String {
    observe::metrics::encode()
}

fn parse_address(raw: &str) -> Result<Address, (StatusCode, String)> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid address {raw}")))
}

fn writable(state: &ApiState) -> Result<(), (StatusCode, String)> {
    if state.readonly {
        return Err((StatusCode::FORBIDDEN, "api is read only".to_string()));
    }
    Ok(())
}

async fn start_collection(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    writable(&state)?;
    let collection = parse_address(&address)?;
    let mut pipelines = state.pipelines.lock().unwrap();
    match pipelines.get(&collection) {
        Some(handle) if !handle.is_finished() => Ok(StatusCode::OK),
        _ => {
            pipelines.insert(collection, state.factory.start(collection));
            tracing::info!(%collection, "collection pipeline started");
            Ok(StatusCode::CREATED)
        }
    }
}

async fn stop_collection(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    writable(&state)?;
    let collection = parse_address(&address)?;
    match state.pipelines.lock().unwrap().remove(&collection) {
        Some(handle) => {
            handle.stop();
            tracing::info!(%collection, "collection pipeline stopped");
            Ok(StatusCode::OK)
        }
        None => Err((
            StatusCode::NOT_FOUND,
            format!("no pipeline for {collection:#x}"),
        )),
    }
}

async fn force_match(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    writable(&state)?;
    let id = id
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid order id {id}")))?;
    let Some(order) = state.store.get(&id) else {
        return Err((StatusCode::NOT_FOUND, format!("unknown order {id:#x}")));
    };
    let pipelines = state.pipelines.lock().unwrap();
    let Some(handle) = pipelines.get(&order.collection) else {
        return Err((
            StatusCode::CONFLICT,
            format!("no pipeline running for {:#x}", order.collection),
        ));
    };
    if handle.force_match(order) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((
            StatusCode::CONFLICT,
            "matching queue is closed".to_string(),
        ))
    }
}

async fn start_execution(
    State(state): State<Arc<ApiState>>,
) -> Result<StatusCode, (StatusCode, String)> {
    writable(&state)?;
    let mut execution = state.execution.lock().unwrap();
    match &*execution {
        ExecutionControl::Disabled => Err((
            StatusCode::CONFLICT,
            "execution engine is not configured".to_string(),
        )),
        ExecutionControl::Running { .. } => Ok(StatusCode::OK),
        ExecutionControl::Stopped { start } => {
            let start = start.clone();
            let (abort, abort_rx) = watch::channel(false);
            start(abort_rx);
            *execution = ExecutionControl::Running { abort, start };
            tracing::info!("execution engine started");
            Ok(StatusCode::CREATED)
        }
    }
}

async fn stop_execution(
    State(state): State<Arc<ApiState>>,
) -> Result<StatusCode, (StatusCode, String)> {
    writable(&state)?;
    let mut execution = state.execution.lock().unwrap();
    match &*execution {
        ExecutionControl::Disabled => Err((
            StatusCode::CONFLICT,
            "execution engine is not configured".to_string(),
        )),
        ExecutionControl::Stopped { .. } => Ok(StatusCode::OK),
        ExecutionControl::Running { abort, start } => {
            let _ = abort.send(true);
            let start = start.clone();
            *execution = ExecutionControl::Stopped { start };
            tracing::info!("execution engine stopped");
            Ok(StatusCode::OK)
        }
    }
}
