use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use queryward::{
    FaultRule, LayerConfig, MemoryBackend, QueryDescriptor, QueryLayer, Rows, TableDescriptor,
    Value, age_above,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const SEED_USERS: [(&str, i64); 6] = [
    ("alice", 20),
    ("bob", 30),
    ("carol", 26),
    ("dave", 10),
    ("erin", 45),
    ("frank", 33),
];

#[derive(Parser)]
#[command(name = "queryward")]
#[command(about = "Run queries against a seeded in-memory backend through the resilient layer")]
struct Cli {
    /// JSON file with a layer configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every query as it reaches a connection
    #[arg(long, global = true)]
    log_queries: bool,

    /// Fail the first N statements with a transient error
    #[arg(long, global = true, default_value_t = 0)]
    transient_failures: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one read query
    Fetch {
        #[arg(long, default_value = "SELECT * FROM user_data ORDER BY name")]
        sql: String,
        /// Positional parameter, repeatable
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Read the same query text twice with different parameters
    FetchTwice {
        #[arg(long, default_value = "alice")]
        first: String,
        #[arg(long, default_value = "bob")]
        second: String,
    },
    GetUser {
        /// Defaults to the first seeded user
        #[arg(long)]
        id: Option<Uuid>,
    },
    UpdateEmail {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        email: String,
    },
    /// Page through user_data and keep users older than --min-age
    Stream {
        #[arg(long, default_value_t = 2)]
        batch_size: usize,
        #[arg(long, default_value_t = 25)]
        min_age: i64,
    },
    /// Fetch several users at once
    Concurrent {
        /// Simulated latency per user lookup
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,
    },
}

#[derive(Serialize)]
struct FetchTwiceReport<'a> {
    first: &'a Rows,
    second: &'a Rows,
    statements_executed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LayerConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LayerConfig::default(),
    };
    if cli.log_queries {
        config = config.log_queries(true);
    }

    let backend = MemoryBackend::new();
    let ids = seed(&backend)?;
    if cli.transient_failures > 0 {
        backend.inject(FaultRule::transient(".")?.times(cli.transient_failures))?;
    }

    let layer = QueryLayer::builder(backend).config(config).build()?;

    match cli.command {
        Command::Fetch { sql, params } => {
            let rows = layer.fetch(QueryDescriptor::with_params(sql, params)).await?;
            print_json(&rows)?;
        }
        Command::FetchTwice { first, second } => {
            let sql = "SELECT * FROM user_data WHERE name = $1";
            let a = layer.fetch(QueryDescriptor::with_params(sql, [first])).await?;
            let b = layer.fetch(QueryDescriptor::with_params(sql, [second])).await?;
            print_json(&FetchTwiceReport {
                first: &a,
                second: &b,
                statements_executed: layer.backend().stats().statements_executed,
            })?;
        }
        Command::GetUser { id } => {
            let id = id.unwrap_or(ids[0]);
            let rows = layer.fetch(user_by_id(id)).await?;
            if rows.is_empty() {
                bail!("no user with id {}", id);
            }
            print_json(&rows[0])?;
        }
        Command::UpdateEmail { id, email } => {
            let id = id.unwrap_or(ids[0]);
            let updated = layer
                .execute(QueryDescriptor::with_params(
                    "UPDATE user_data SET email = $1 WHERE id = $2",
                    [email, id.to_string()],
                ))
                .await?;
            if updated == 0 {
                bail!("no user with id {}", id);
            }
            print_json(&layer.fetch_uncached(user_by_id(id)).await?)?;
        }
        Command::Stream {
            batch_size,
            min_age,
        } => {
            let table = TableDescriptor::new("user_data", "id")?;
            let mut batches = layer.stream(table.clone(), batch_size);
            while let Some(batch) = batches.try_next().await? {
                info!(offset = batch.offset(), rows = batch.len(), "Batch");
            }

            let older: Rows = layer
                .stream(table, batch_size)
                .filter_rows(age_above(min_age))
                .try_collect()
                .await?;
            print_json(&older)?;
        }
        Command::Concurrent { latency_ms } => {
            layer
                .backend()
                .latency("WHERE id", Duration::from_millis(latency_ms))?;
            // Literal ids give each lookup its own cache key
            let queries = ids
                .iter()
                .map(|id| format!("SELECT * FROM user_data WHERE id = '{}'", id));
            let results = layer.fetch_concurrently(queries).await?;
            print_json(&results)?;
        }
    }

    info!("{}", layer.backend().stats());
    if let Some(stats) = layer.cache_stats() {
        info!("{}", stats);
    }
    Ok(())
}

fn seed(backend: &MemoryBackend) -> Result<Vec<Uuid>> {
    backend.run(
        "CREATE TABLE user_data (id TEXT PRIMARY KEY, name TEXT NOT NULL, email TEXT, age INTEGER)",
    )?;

    let mut ids = Vec::with_capacity(SEED_USERS.len());
    for (name, age) in SEED_USERS {
        let id = Uuid::new_v4();
        backend.run(QueryDescriptor::with_params(
            "INSERT INTO user_data VALUES ($1, $2, $3, $4)",
            [
                Value::from(id.to_string()),
                Value::from(name),
                Value::from(format!("{}@example.com", name)),
                Value::from(age),
            ],
        ))?;
        ids.push(id);
    }
    Ok(ids)
}

fn user_by_id(id: Uuid) -> QueryDescriptor {
    QueryDescriptor::with_params("SELECT * FROM user_data WHERE id = $1", [id.to_string()])
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("queryward=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
