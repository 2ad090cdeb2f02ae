//! db-warden - a read-only SQL gateway with a tiered natural-language query front end.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use db_warden::audit::AuditTrail;
use db_warden::cli::{Cli, Command};
use db_warden::config::Config;
use db_warden::db::{DatabaseClient, MockDatabaseClient, MySqlClient};
use db_warden::llm::{create_client, LlmProvider, PromptSet};
use db_warden::logging;
use db_warden::mcp::{serve, shutdown_signal, McpHandler, ServerState};
use db_warden::memory::{QueryMemory, RememberRequest};
use db_warden::orchestrator::Orchestrator;
use db_warden::persistence::StateDb;
use db_warden::safety::SqlValidator;
use db_warden::session::SessionRegistry;
use db_warden::tools::ToolSurface;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // A missing .env is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    let config = load_config(&cli)?;

    if cli.is_one_shot() {
        logging::init_file_logging(&config.log_level);
    } else {
        logging::init_stderr_logging(&config.log_level);
    }

    let state_db = Arc::new(
        StateDb::open(&config.state_db_path())
            .await
            .context("Failed to open state database")?,
    );
    let memory = Arc::new(QueryMemory::new(state_db.clone()));

    let result = match cli.command() {
        Command::Remember { question, sql, tier } => {
            remember(&memory, question, sql, tier).await
        }
        command => {
            let db = connect_database(&cli, &config).await?;
            let tools = Arc::new(ToolSurface::new(
                db.clone(),
                SqlValidator::from_limits(&config.limits),
                AuditTrail::from_config(&config.audit, Some(state_db.clone())),
            ));
            let orchestrator = build_orchestrator(&config, tools.clone(), memory.clone());

            match command {
                Command::Ask { question } => {
                    let result = ask(orchestrator?, &question).await;
                    if let Err(e) = db.close().await {
                        warn!(error = %e, "Failed to close database pool");
                    }
                    result
                }
                _ => {
                    let orchestrator = orchestrator
                        .map_err(|e| warn!(error = %e, "Query orchestrator unavailable"))
                        .ok();
                    run_server(&config, db, tools, orchestrator, memory).await
                }
            }
        }
    };

    state_db.close().await;
    result
}

/// File, then environment, then flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli.config_path();
    let mut config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env()?;
    cli.apply_overrides(&mut config);

    let needs_database = !cli.mock_db && !matches!(cli.command(), Command::Remember { .. });
    if needs_database {
        config.validate()?;
    }
    Ok(config)
}

async fn connect_database(cli: &Cli, config: &Config) -> Result<Arc<dyn DatabaseClient>> {
    if cli.mock_db {
        info!("Using mock database");
        return Ok(Arc::new(MockDatabaseClient::with_sample_catalog()));
    }

    info!("Connecting to {}", config.database.display_string());
    let client = MySqlClient::connect(&config.database, &config.limits)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(client))
}

fn build_orchestrator(
    config: &Config,
    tools: Arc<ToolSurface>,
    memory: Arc<QueryMemory>,
) -> Result<Arc<Orchestrator>> {
    let provider: LlmProvider = config
        .llm
        .provider
        .parse()
        .map_err(anyhow::Error::msg)?;
    let llm = create_client(provider, None, &config.llm)?;
    let prompts = PromptSet::load(&config.prompts)?;

    info!(provider = %provider, model = %config.llm.model, "Query orchestrator ready");
    Ok(Arc::new(
        Orchestrator::new(llm, tools.clone(), prompts)
            .with_schema_source(tools)
            .with_memory(memory),
    ))
}

async fn run_server(
    config: &Config,
    db: Arc<dyn DatabaseClient>,
    tools: Arc<ToolSurface>,
    orchestrator: Option<Arc<Orchestrator>>,
    memory: Arc<QueryMemory>,
) -> Result<()> {
    let handler = Arc::new(McpHandler::new(
        tools,
        config.server.name.clone(),
        config.server.version.clone(),
    ));
    let idle_timeout = match config.server.session_idle_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let sessions = Arc::new(
        SessionRegistry::new(handler)
            .with_close_grace(Duration::from_secs(config.server.shutdown_grace_secs))
            .with_max_sessions(config.server.max_sessions)
            .with_idle_timeout(idle_timeout),
    );

    let mut state = ServerState::new(sessions, &config.server).with_memory(memory);
    match orchestrator {
        Some(orchestrator) => state = state.with_orchestrator(orchestrator),
        None => warn!("/api/query will answer 503"),
    }

    serve(&config.server, Arc::new(state), db, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn ask(orchestrator: Arc<Orchestrator>, question: &str) -> Result<()> {
    let outcome = orchestrator.ask(question, &[]).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn remember(memory: &QueryMemory, question: String, sql: String, tier: u8) -> Result<()> {
    let outcome = memory
        .remember(RememberRequest {
            natural_language: question,
            generated_sql: sql,
            tier,
            remembered_by: "cli".to_string(),
            remembered_by_name: None,
        })
        .await?;
    println!("{}", serde_json::json!({"success": true, "id": outcome.id()}));
    Ok(())
}
