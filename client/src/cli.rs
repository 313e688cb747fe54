use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::api::{AvailableAlgorithms, CreateTaskRequest, ErrorBody};
use common::Task;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para crear y seguir tareas de procesamiento en el master")]
pub struct Cli {
    /// URL del master (si no, MASTER_URL)
    #[arg(long)]
    pub master_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crea una tarea PENDING
    Submit {
        #[arg(value_name = "ALGORITMO")]
        algorithm: String,
        #[arg(value_name = "INPUT_FILE_ID")]
        input_file_id: String,
        /// Parámetros como objeto JSON, ej. '{"xres": 10, "yres": 10}'
        #[arg(long)]
        params: Option<String>,
    },
    /// Consulta el estado de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Lista tareas, opcionalmente filtradas por estado
    List {
        #[arg(long)]
        state: Option<String>,
    },
    /// Ejecuta una tarea PENDING y espera el resultado
    Run {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Lista los algoritmos disponibles con su esquema
    Algorithms,
}

pub fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--params no es JSON válido")?;
    if !value.is_object() {
        bail!("--params tiene que ser un objeto JSON");
    }
    Ok(Some(value))
}

pub struct MasterClient {
    http: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => {
                let mut msg = format!("{status}: {}", body.detail);
                for v in &body.violations {
                    msg.push_str(&format!("\n  - {}: {}", v.field, v.message));
                }
                if let Some(code) = body.code {
                    msg.push_str(&format!(" (código {code})"));
                }
                bail!(msg)
            }
            Err(_) => bail!("{status}: {text}"),
        }
    }

    pub async fn submit(&self, req: &CreateTaskRequest) -> Result<Task> {
        let url = format!("{}/api/task", self.base_url);
        Self::decode(self.http.post(&url).json(req).send().await?).await
    }

    pub async fn status(&self, id: &str) -> Result<Task> {
        let url = format!("{}/api/tasks/{id}", self.base_url);
        Self::decode(self.http.get(&url).send().await?).await
    }

    pub async fn list(&self, state: Option<&str>) -> Result<Vec<Task>> {
        let url = format!("{}/api/tasks/", self.base_url);
        let mut req = self.http.get(&url);
        if let Some(state) = state {
            req = req.query(&[("state", state)]);
        }
        Self::decode(req.send().await?).await
    }

    pub async fn run(&self, id: &str) -> Result<Task> {
        let url = format!("{}/api/tasks/{id}/run", self.base_url);
        Self::decode(self.http.post(&url).send().await?).await
    }

    pub async fn algorithms(&self) -> Result<AvailableAlgorithms> {
        let url = format!("{}/api/tasks/available-algorithms", self.base_url);
        Self::decode(self.http.get(&url).send().await?).await
    }
}

fn print_task(task: &Task) {
    println!("Tarea:");
    println!("  id: {}", task.id);
    println!("  algoritmo: {}", task.algorithm);
    println!("  estado: {}", task.state);
    println!("  input: {}", task.input_file_id);
    println!("  params: {}", task.params);
    println!("  creada: {}", task.datetime_create);
    if let Some(start) = task.datetime_start {
        println!("  inicio: {start}");
    }
    if let Some(end) = task.datetime_end {
        println!("  fin: {end}");
    }
    if let Some(path) = &task.output_file_full_path {
        println!(
            "  salida: {} ({})",
            path,
            task.output_file_id.as_deref().unwrap_or("-")
        );
    }
    if let (Some(code), Some(err)) = (task.error_code, &task.error) {
        println!("  error: {code}: {err}");
    }
}

pub async fn execute(cli: Cli, base_url: &str) -> Result<()> {
    let master = MasterClient::new(base_url);

    match cli.command {
        Commands::Submit {
            algorithm,
            input_file_id,
            params,
        } => {
            let req = CreateTaskRequest {
                algorithm,
                input_file_id,
                params: parse_params(params.as_deref())?,
            };
            let task = master.submit(&req).await?;
            print_task(&task);
        }
        Commands::Status { id } => {
            let task = master.status(&id).await?;
            print_task(&task);
        }
        Commands::List { state } => {
            let tasks = master.list(state.as_deref()).await?;
            if tasks.is_empty() {
                println!("No hay tareas");
            }
            for t in tasks {
                println!(
                    "{}  {:<8}  {:<18}  {}",
                    t.id,
                    t.state.as_str(),
                    t.algorithm,
                    t.input_file_id
                );
            }
        }
        Commands::Run { id } => {
            let task = master.run(&id).await?;
            print_task(&task);
        }
        Commands::Algorithms => {
            for (name, info) in master.algorithms().await? {
                println!("{name}: {}", info.description);
                println!("{}", serde_json::to_string_pretty(&info.schema)?);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_con_params() {
        let cli = Cli::try_parse_from([
            "client",
            "submit",
            "RASTER_RESCALE",
            "f1",
            "--params",
            r#"{"xres": 10, "yres": 10}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                algorithm, params, ..
            } => {
                assert_eq!(algorithm, "RASTER_RESCALE");
                let params = parse_params(params.as_deref()).unwrap().unwrap();
                assert_eq!(params["xres"], 10);
            }
            _ => panic!("se esperaba submit"),
        }
    }

    #[test]
    fn params_tienen_que_ser_objeto() {
        assert!(parse_params(Some("[1, 2]")).is_err());
        assert!(parse_params(Some("{roto")).is_err());
        assert!(parse_params(None).unwrap().is_none());
    }

    #[tokio::test]
    async fn error_422_muestra_violaciones() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/task")
            .with_status(422)
            .with_body(
                json!({
                    "detail": "RASTER_RESCALE: parámetros inválidos: xres: campo requerido",
                    "violations": [{"field": "xres", "message": "campo requerido"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = MasterClient::new(&server.url())
            .submit(&CreateTaskRequest {
                algorithm: "RASTER_RESCALE".into(),
                input_file_id: "f1".into(),
                params: Some(json!({"yres": 1})),
            })
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("422"));
        assert!(msg.contains("- xres: campo requerido"));
    }
}
