//! `run` subcommand: boots the vote service — loads configuration, connects
//! the ballot store backends, seeds the voted index, and serves HTTP.

use crate::config::{BackendKind, ServiceConfig};
use crate::datastore::memory::InMemoryDatastore;
use crate::datastore::Datastore;
use crate::http::{self, AppState};
use crate::service::VoteService;
use crate::store::keyspace::KeyspaceStore;
use crate::store::memory::MemoryStore;
use crate::store::relational::RelationalStore;
use crate::store::BallotStore;
use crate::voted_index::VotedIndex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn build_backend(
    kind: BackendKind,
    config: &ServiceConfig,
) -> Result<Arc<dyn BallotStore>, Box<dyn std::error::Error>> {
    match kind {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        BackendKind::Keyspace => {
            let redis_client = redis::Client::open(config.keyspace_url())?;
            let conn = redis::aio::ConnectionManager::new(redis_client).await?;
            Ok(Arc::new(KeyspaceStore::new(conn)))
        }
        BackendKind::Relational => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(100)
                .idle_timeout(Duration::from_secs(240))
                .connect(&config.relational_url()?)
                .await?;
            let store = RelationalStore::new(pool);
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load(config_path.map(PathBuf::from).as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.logging.level.clone()))
        .init();
    tracing::info!(port = config.port, "starting vote service");

    // The object store is an external integration outside this core's
    // scope; the in-memory fixture stands in until a real client is wired
    // up against it.
    let datastore: Arc<dyn Datastore> = Arc::new(InMemoryDatastore::new());

    let fast_store = build_backend(config.fast_backend_kind, &config).await?;
    let long_store = build_backend(config.long_backend_kind, &config).await?;

    let voted_index = Arc::new(VotedIndex::new());
    let service = Arc::new(VoteService::new(
        datastore,
        fast_store.clone(),
        long_store.clone(),
        voted_index.clone(),
    ));

    let cancel = CancellationToken::new();
    service.prime_voted_index(&cancel).await?;

    if !config.single_instance {
        voted_index.spawn_reload_task(fast_store, long_store, Duration::from_secs(1), cancel.clone());
    }

    let internal_token = match std::env::var("VOTE_SERVICE_INTERNAL_TOKEN") {
        Ok(token) => token,
        Err(_) if config.development => "development".to_string(),
        Err(_) => return Err("VOTE_SERVICE_INTERNAL_TOKEN must be set outside development mode".into()),
    };
    let state = AppState {
        service,
        internal_token: internal_token.into(),
    };

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
