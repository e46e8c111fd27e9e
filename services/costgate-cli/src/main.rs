use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Parser, Subcommand};
use costgate_core::{
    ApprovalGate, AuthMode, Clock, CoreError, CoreResult, CostgateConfig, ExpiryPolicy,
    LocalClock, QueryText,
};
use costgate_query::{ConsoleApproval, QueryExecutor};
use costgate_storage::{CacheKey, CacheStore};
use costgate_warehouse::LazyBigQueryClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "costgate")]
#[command(about = "Run BigQuery queries behind a cost check and a local result cache", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "COSTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory (overrides configuration)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Skip the local cache entirely
    #[arg(long, global = true)]
    no_cache: bool,

    /// Cache expiry: daily, weekly, monthly or a number of minutes
    #[arg(long, global = true)]
    expire: Option<ExpiryPolicy>,

    /// Authenticate with this service account key instead of ambient credentials
    #[arg(long, global = true)]
    service_account: Option<PathBuf>,

    /// Billing project
    #[arg(long, global = true, env = "COSTGATE_PROJECT")]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a query, asking for approval before anything billable happens
    Run {
        #[command(flatten)]
        source: QuerySource,

        /// Print at most this many rows
        #[arg(long)]
        max_rows: Option<usize>,
    },

    /// Dry-run a query and report what it would cost
    Estimate {
        #[command(flatten)]
        source: QuerySource,
    },

    /// Print where today's cache entry for a query lives
    CachePath {
        #[command(flatten)]
        source: QuerySource,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct QuerySource {
    /// Query text
    #[arg(long)]
    sql: Option<String>,

    /// File holding the query
    #[arg(long)]
    file: Option<PathBuf>,
}

impl QuerySource {
    async fn read(&self) -> CoreResult<QueryText> {
        match (&self.sql, &self.file) {
            (_, Some(path)) => QueryText::from_file(path).await,
            (sql, None) => QueryText::from_option(sql.as_deref()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_user_abort() => {
            eprintln!("Aborted: query not executed.");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "costgate failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> CoreResult<()> {
    let config = resolve_config(&cli)?;

    match &cli.command {
        Commands::Run { source, max_rows } => {
            let query = source.read().await?;
            let executor = build_executor(&config, Arc::new(ConsoleApproval::stdio())).await?;
            let table = executor.run(query.as_str()).await?;
            print_table(&table, *max_rows)
        }

        Commands::Estimate { source } => {
            let query = source.read().await?;
            let executor = build_executor(&config, Arc::new(ConsoleApproval::stdio())).await?;
            let summary = executor.estimate(query.as_str()).await?;
            println!("{summary}");
            Ok(())
        }

        Commands::CachePath { source } => {
            let query = source.read().await?;
            if !config.cache.enabled {
                return Err(CoreError::validation("the cache is disabled"));
            }
            let store = CacheStore::open(&config.cache).await?;
            let path = store.location(&CacheKey::derive(query.as_str()), LocalClock.today());
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Layered configuration with command-line flags on top.
fn resolve_config(cli: &Cli) -> CoreResult<CostgateConfig> {
    let mut config = CostgateConfig::load(cli.config.as_deref())?;

    if let Some(dir) = &cli.cache_dir {
        config.cache.path = dir.clone();
    }
    if let Some(expiry) = cli.expire {
        config.cache.expiry = expiry;
        if expiry.minutes() == 0 {
            config.cache.enabled = false;
        }
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }
    if let Some(path) = &cli.service_account {
        config.auth = AuthMode::ServiceAccount { path: path.clone() };
    }
    if let Some(project) = &cli.project {
        config.warehouse.project_id = Some(project.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Credentials and the billing project are resolved on the first remote
/// call, so a cache hit needs neither.
async fn build_executor(
    config: &CostgateConfig,
    approval: Arc<dyn ApprovalGate>,
) -> CoreResult<QueryExecutor> {
    let client = Arc::new(LazyBigQueryClient::new(config.clone()));
    QueryExecutor::new(config, client.clone(), client, approval).await
}

fn print_table(table: &RecordBatch, max_rows: Option<usize>) -> CoreResult<()> {
    let total = table.num_rows();
    let shown = max_rows.map_or(total, |n| n.min(total));

    let rendered = pretty_format_batches(&[table.slice(0, shown)])
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    println!("{rendered}");

    if shown < total {
        println!("({shown} of {total} rows shown)");
    } else {
        println!("({total} rows)");
    }
    Ok(())
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_source_is_exclusive() {
        assert!(Cli::try_parse_from(["costgate", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["costgate", "run", "--sql", "SELECT 1", "--file", "q.sql"])
                .is_err()
        );

        let cli = Cli::try_parse_from(["costgate", "estimate", "--file", "q.sql"]).unwrap();
        match cli.command {
            Commands::Estimate { source } => {
                assert_eq!(source.file, Some(PathBuf::from("q.sql")));
                assert!(source.sql.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "costgate",
            "run",
            "--sql",
            "SELECT 1",
            "--max-rows",
            "5",
            "--expire",
            "weekly",
            "--no-cache",
        ])
        .unwrap();

        assert!(cli.no_cache);
        assert_eq!(cli.expire, Some(ExpiryPolicy::Weekly));
        assert!(matches!(cli.command, Commands::Run { max_rows: Some(5), .. }));
    }

    #[test]
    fn test_flags_override_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "costgate",
            "--cache-dir",
            tmp.path().to_str().unwrap(),
            "--expire",
            "0",
            "--project",
            "analytics-prod",
            "cache-path",
            "--sql",
            "SELECT 1",
        ])
        .unwrap();

        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.cache.path, tmp.path());
        assert!(!config.cache.enabled);
        assert_eq!(config.warehouse.project_id.as_deref(), Some("analytics-prod"));
    }

    #[test]
    fn test_missing_service_account_is_rejected() {
        let cli = Cli::try_parse_from([
            "costgate",
            "--service-account",
            "/nonexistent/key.json",
            "estimate",
            "--sql",
            "SELECT 1",
        ])
        .unwrap();

        assert!(matches!(resolve_config(&cli), Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cached_result_needs_no_project() {
        use arrow::array::Int64Array;
        use arrow::datatypes::{DataType, Field, Schema};
        use costgate_query::ScriptedApproval;

        let tmp = tempfile::tempdir().unwrap();
        let config = CostgateConfig::builder()
            .cache_path(tmp.path(), true)
            .build()
            .unwrap();
        assert!(config.warehouse.project_id.is_none());

        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)]));
        let table =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![7, 8]))]).unwrap();
        let store = CacheStore::open(&config.cache).await.unwrap();
        let path = store.location(&CacheKey::derive("SELECT n FROM t"), LocalClock.today());
        store.write(&path, &table).await.unwrap();

        let approval = Arc::new(ScriptedApproval::rejecting());
        let executor = build_executor(&config, approval.clone()).await.unwrap();
        let cached = executor.run("SELECT n FROM t").await.unwrap();

        assert_eq!(cached.num_rows(), 2);
        assert_eq!(approval.prompts(), 0);
    }

    #[tokio::test]
    async fn test_blank_sql_is_rejected() {
        let source = QuerySource {
            sql: Some("  ".into()),
            file: None,
        };
        assert!(matches!(source.read().await, Err(CoreError::Validation(_))));
    }
}
