use clap::Parser;
use llm_gateway::{build_router, AppState, Gateway, GatewayConfig, SharedAuditLog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "llm-gateway",
    about = "Metered LLM gateway — proxy chat completions with prepaid credit billing",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Usage audit log path (JSONL)
    #[arg(long, default_value = "llm-gateway-audit.jsonl")]
    audit_log: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. llm-gateway.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/llm-gateway/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/llm-gateway/config.toml");
            println!("     ~/.config/llm-gateway/config.toml");
        }
        println!("  3. ~/.llm-gateway.toml");
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let audit = SharedAuditLog::new(&cli.audit_log)?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let gateway = Arc::new(Gateway::new(&config, audit, client)?);

    let available = gateway
        .registry
        .list_models()
        .iter()
        .filter(|p| p.available())
        .count();

    info!("llm-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Port:            {}", config.port);
    info!("  Models:          {} configured, {} available", config.models.len(), available);
    info!("  Safety factor:   {}", config.safety_factor.max(2));
    info!("  Initial credits: {}", config.initial_credits);
    info!("  Audit log:       {}", cli.audit_log.display());

    let state = Arc::new(AppState {
        config: config.clone(),
        gateway,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
