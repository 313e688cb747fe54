use anyhow::{Context, Result};
use common::api::ErrorBody;
use common::{Settings, Task, TaskId};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Lo que contestó el master a `POST /api/tasks/:id/run`.
#[derive(Debug)]
pub enum RunOutcome {
    Done(Box<Task>),
    Failed { code: Option<u16>, detail: String },
    /// Otro worker la tomó primero (409)
    Claimed,
    Missing,
}

#[derive(Clone)]
pub struct Worker {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    slots: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
}

impl Worker {
    pub fn new(base_url: &str, concurrency: u32, poll_interval: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            slots: Arc::new(Semaphore::new(concurrency.max(1) as usize)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn fetch_pending(&self) -> Result<Vec<Task>> {
        let url = format!("{}/api/tasks/?state=PENDING", self.base_url);
        let tasks = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("lista de tareas inválida")?;
        Ok(tasks)
    }

    pub async fn run_task(&self, id: TaskId) -> Result<RunOutcome> {
        let url = format!("{}/api/tasks/{}/run", self.base_url, id);
        let resp = self.client.post(&url).send().await?;

        let outcome = match resp.status() {
            s if s.is_success() => RunOutcome::Done(Box::new(resp.json().await?)),
            StatusCode::CONFLICT => RunOutcome::Claimed,
            StatusCode::NOT_FOUND => RunOutcome::Missing,
            status => {
                let body = resp.text().await.unwrap_or_default();
                match serde_json::from_str::<ErrorBody>(&body) {
                    Ok(err) => RunOutcome::Failed {
                        code: err.code,
                        detail: err.detail,
                    },
                    Err(_) => RunOutcome::Failed {
                        code: None,
                        detail: format!("{status}: {body}"),
                    },
                }
            }
        };
        Ok(outcome)
    }

    /// Consulta una vez y despacha cada tarea nueva respetando los slots libres.
    /// Devuelve los handles de lo despachado.
    pub async fn poll_once(&self) -> Result<Vec<JoinHandle<()>>> {
        let pending = self.fetch_pending().await?;
        let mut handles = Vec::new();

        for task in pending {
            if !self.claim_locally(task.id) {
                continue;
            }
            let permit = self.slots.clone().acquire_owned().await?;
            let worker = self.clone();

            handles.push(tokio::spawn(async move {
                let id = task.id;
                info!("disparando tarea {} ({})", id, task.algorithm);
                match worker.run_task(id).await {
                    Ok(RunOutcome::Done(task)) => info!(
                        "tarea {} DONE -> {}",
                        id,
                        task.output_file_full_path.as_deref().unwrap_or("-")
                    ),
                    Ok(RunOutcome::Failed { code, detail }) => {
                        warn!("tarea {} terminó en ERROR [{:?}]: {}", id, code, detail)
                    }
                    Ok(RunOutcome::Claimed) => debug!("tarea {} ya tomada por otro worker", id),
                    Ok(RunOutcome::Missing) => debug!("tarea {} ya no existe", id),
                    Err(e) => warn!("error HTTP disparando la tarea {}: {:#}", id, e),
                }
                worker.release_locally(id);
                drop(permit);
            }));
        }
        Ok(handles)
    }

    fn claim_locally(&self, id: TaskId) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(id),
            Err(_) => false,
        }
    }

    fn release_locally(&self, id: TaskId) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&id);
        }
    }
}

/// Loop principal del worker.
/// - Pide las tareas PENDING al master.
/// - Dispara cada una con `POST /run` hasta WORKER_CONCURRENCY en paralelo.
/// - Si no hay nada nuevo, duerme WORKER_POLL_INTERVAL_SECS.
pub async fn run(settings: &Settings) -> Result<()> {
    let worker = Worker::new(
        &settings.master_url,
        settings.worker_concurrency,
        settings.worker_poll_interval,
    );

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "desconocido".to_string());
    info!(
        "worker {} con concurrency={} contra {}",
        hostname, settings.worker_concurrency, worker.base_url
    );

    loop {
        match worker.poll_once().await {
            Ok(handles) if !handles.is_empty() => {
                debug!("{} tareas despachadas", handles.len());
            }
            Ok(_) => sleep(worker.poll_interval).await,
            Err(e) => {
                warn!("no se pudo consultar al master: {:#}", e);
                sleep(worker.poll_interval).await;
            }
        }
    }
}
