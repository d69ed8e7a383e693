// Shard Fabric CLI - checks configured connections and runs ad-hoc statements
// through the same routing the application uses

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use shard_fabric::{
    config::{Config, ConfigSource, DatabaseConfigurations},
    Connector, DataFabric, EntityBindings, EntityType, Operation, OperationOutput, SqlxConnector,
    DEFAULT_GROUP,
};

const SHARD_ENTITY: &str = "Shard";
const DIRECTORY_ENTITY: &str = "Directory";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shard_fabric=info")),
        )
        .init();

    let config = Config::from_env()?;
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("check") => check(&config).await,
        Some("exec") if args.len() == 4 => exec(&config, &args[2], &args[3]).await,
        _ => {
            eprintln!("Usage: shard_fabric <command>");
            eprintln!("Commands:");
            eprintln!("  check                          - Verify every configured connection");
            eprintln!("  exec <shard|directory> <sql>   - Run one statement on a shard or the directory");
            Ok(())
        }
    }
}

/// Open and probe every connection in the store
async fn check(config: &Config) -> anyhow::Result<()> {
    let configs = DatabaseConfigurations::from_file(&config.database_config)?;
    let connector = SqlxConnector::new();
    let mut failed = 0;

    println!(
        "Checking {} connections from {}",
        configs.len(),
        config.database_config.display()
    );
    for name in configs.known_names() {
        let Some(params) = configs.get_config(&name) else {
            continue;
        };
        let status = match connector.open(&name, &params).await {
            Ok(handle) => {
                let alive = handle.verify(config.verify_timeout()).await;
                handle.close().await;
                if alive {
                    "ok".to_string()
                } else {
                    "verification failed".to_string()
                }
            }
            Err(e) => e.to_string(),
        };
        if status != "ok" {
            failed += 1;
        }
        println!("  {:<32} {}", name, status);
    }

    if failed > 0 {
        anyhow::bail!("{} connections failed", failed);
    }
    Ok(())
}

async fn exec(config: &Config, target: &str, sql: &str) -> anyhow::Result<()> {
    let mut bindings = EntityBindings::new();
    bindings
        .bind_as_shard_routed(&EntityType::new(SHARD_ENTITY))?
        .bind_as_directory_routed(&EntityType::new(DIRECTORY_ENTITY))?;
    let fabric = Arc::new(DataFabric::from_config(config, bindings)?);
    let mut ctx = fabric.new_context();

    let operation = if sql.trim_start().to_ascii_lowercase().starts_with("select") {
        Operation::query(sql)
    } else {
        Operation::execute(sql)
    };

    let output = if target == "directory" {
        ctx.execute(DIRECTORY_ENTITY, operation).await
    } else {
        let _ = ctx.shards_mut().activate([(DEFAULT_GROUP, target)]);
        ctx.execute(SHARD_ENTITY, operation).await
    };
    ctx.close().await;

    match output? {
        OperationOutput::RowsAffected(n) => println!("{} rows affected", n),
        OperationOutput::Rows(rows) => {
            for row in &rows {
                let mut columns: Vec<_> = row.iter().collect();
                columns.sort();
                let line: Vec<String> = columns.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                println!("{}", line.join(" "));
            }
            println!("({} rows)", rows.len());
        }
    }
    Ok(())
}
