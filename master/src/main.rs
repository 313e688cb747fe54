mod handlers;
mod state;

use anyhow::{Context, Result};
use common::{
    registry, AlgorithmRegistry, Executor, HttpFileStore, JsonFileTaskStore, MemoryTaskStore,
    Settings, TaskService, TaskStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;

    // RUST_LOG manda; si no está, DEBUG decide el nivel
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter("master")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    registry::init(AlgorithmRegistry::builtin(settings.gdal_tools())?)?;
    let registry = registry::global().context("registro de algoritmos sin inicializar")?;
    info!("algoritmos registrados: {:?}", registry.names());

    let store: Arc<dyn TaskStore> = match &settings.task_store_path {
        Some(path) => {
            let store = JsonFileTaskStore::open(path.clone())
                .await
                .with_context(|| format!("no se pudo abrir el store {}", path.display()))?;
            info!("tareas persistidas en {}", store.path().display());
            Arc::new(store)
        }
        None => {
            warn!("TASK_STORE_PATH no definido, las tareas viven sólo en memoria");
            Arc::new(MemoryTaskStore::new())
        }
    };

    let files = HttpFileStore::new(
        &settings.file_storage_host,
        settings.file_storage_port,
        settings.file_storage_timeout,
    )?;
    info!("almacenamiento de archivos en {}", files.base_url());

    let tasks = TaskService::new(Arc::clone(&registry), Arc::clone(&store));
    let executor = Executor::new(registry, store, Arc::new(files));

    // router HTTP
    let app = handlers::build_router(AppState::new(tasks, executor))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(settings.bind_addr()).await?;
    info!(
        "{} v{} escuchando en {}",
        settings.app_name,
        settings.app_version,
        listener.local_addr()?
    );

    axum::serve(listener, app).await?;
    Ok(())
}
