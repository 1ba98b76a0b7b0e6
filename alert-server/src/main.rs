use alert_core::config::{PlatformConfig, RouterConfig};
use alert_core::decision::SessionContext;
use alert_core::event_log::EventLog;
use alert_core::platform::PlatformClient;
use alert_core::router::AlertRouter;
use alert_schema::Provider;
use alert_server::webhook::{webhook_router, AppState};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "alert-router", version, about = "Route monitoring alerts to workspace tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve webhook endpoints over HTTP.
    Serve(ServeArgs),
    /// Handle one payload and print the report.
    Handle(HandleArgs),
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,
    /// SQLite file recording every pipeline step per alert.
    #[arg(long)]
    events_db: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, clap::Args)]
struct HandleArgs {
    /// Payload file, or `-` for stdin.
    #[arg(long, default_value = "-")]
    payload: String,
    /// Decode as this provider instead of detecting it.
    #[arg(long)]
    provider: Option<String>,
    /// Session the alert arrived in; defaults to RW_SESSION_ID.
    #[arg(long)]
    session_id: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long, value_enum, default_value_t = Format::Markdown)]
    format: Format,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting tracing default")?;

    let config = RouterConfig::load().context("loading router config")?;
    let platform = PlatformConfig::from_env().context("loading platform config")?;
    // The blocking HTTP client must be built outside the async runtime.
    let client = PlatformClient::new(&platform).context("building platform client")?;

    match cli.command {
        Command::Serve(args) => serve(args, client, config, platform.session_id),
        Command::Handle(args) => handle(args, client, config, platform.session_id),
    }
}

fn serve(
    args: ServeArgs,
    client: PlatformClient,
    config: RouterConfig,
    session_id: Option<String>,
) -> anyhow::Result<()> {
    let mut router = AlertRouter::new(client, config);
    if let Some(path) = &args.events_db {
        let log = EventLog::open(path).with_context(|| format!("opening event log {path}"))?;
        router = router.with_event_log(log);
    }
    let state = Arc::new(AppState {
        router,
        context: SessionContext {
            current_session: session_id,
            notes: None,
        },
        dry_run: args.dry_run,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;
    let result = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&args.bind)
            .await
            .with_context(|| format!("binding {}", args.bind))?;
        tracing::info!(bind = %args.bind, dry_run = args.dry_run, "alert-router listening");
        axum::serve(listener, webhook_router(state))
            .await
            .context("serving webhooks")
    });
    runtime.shutdown_background();
    result
}

fn handle(
    args: HandleArgs,
    client: PlatformClient,
    config: RouterConfig,
    session_id: Option<String>,
) -> anyhow::Result<()> {
    let payload = read_payload(&args.payload)?;
    let router = AlertRouter::new(client, config);
    let context = SessionContext {
        current_session: args.session_id.or(session_id),
        notes: args.notes,
    };

    let report = match args.provider.as_deref() {
        Some(name) => {
            let provider = Provider::from_name(name)
                .with_context(|| format!("unknown alert provider '{name}'"))?;
            router.handle_as(provider, &payload, &context, args.dry_run)
        }
        None => router.handle_alert(&payload, &context, args.dry_run),
    };

    match args.format {
        Format::Markdown => println!("{}", report.to_markdown()),
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    if let Some(issue) = report.issue() {
        anyhow::bail!("{}", issue.title);
    }
    Ok(())
}

fn read_payload(source: &str) -> anyhow::Result<Value> {
    let mut raw = String::new();
    if source == "-" {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("reading payload from stdin")?;
    } else {
        raw = std::fs::read_to_string(source)
            .with_context(|| format!("reading payload {source}"))?;
    }
    serde_json::from_str(&raw).with_context(|| format!("parsing payload {source}"))
}
