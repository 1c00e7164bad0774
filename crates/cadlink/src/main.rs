use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, error, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use cadlink::api;
use cadlink::bridge::{Attached, Bridge, BridgeClient, HeadlessHost};
use cadlink::config::{self, APP_NAME, AppConfig, AppPaths};
use cadlink::db::Database;
use cadlink::generate::{CodeGenerator, GeminiClient};
use cadlink::session::SessionRepository;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_send(ctx: RuntimeContext, cmd: SendCommand) -> Result<()> {
    handle_send(&ctx, cmd).await
}

#[tokio::main]
async fn async_sync(ctx: RuntimeContext, cmd: SyncCommand) -> Result<()> {
    handle_sync(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Bridge(cmd) => handle_bridge(&ctx, cmd),
        Command::Send(cmd) => async_send(ctx, cmd),
        Command::Sync(cmd) => async_sync(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "cadlink - prompt-to-CAD command bridge.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Run the command bridge against the headless host
    Bridge(BridgeCommand),
    /// Send a script to a running bridge
    Send(SendCommand),
    /// Ask a running bridge to switch session documents
    Sync(SyncCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct BridgeCommand {
    /// Interpreter command line scripts are piped to (overrides bridge.interpreter)
    #[arg(long, value_name = "CMD")]
    interpreter: Option<String>,
    /// Port to listen on (overrides bridge.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct SendCommand {
    /// Script file to send; reads stdin when omitted or "-"
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SyncCommand {
    /// Session being entered ("new" for a fresh session)
    #[arg(value_name = "CURRENT_ID")]
    current_id: String,
    /// Session being left; its document is saved first
    #[arg(long, value_name = "ID")]
    previous: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
    /// Whether this run wrote the default config file.
    created_config: bool,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let (config, created_config) = load_or_init_config(&paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
            created_config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("cadlink={level},tower_http={level}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // The bridge and services log through the `log` facade.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {} and state dir {}",
                self.paths.data_dir.display(),
                self.paths.state_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        fs::create_dir_all(&self.paths.state_dir).with_context(|| {
            format!(
                "creating state directory {}",
                self.paths.state_dir.display()
            )
        })?;
        Ok(())
    }

    fn bridge_client(&self) -> Result<BridgeClient> {
        Ok(BridgeClient::new(
            self.config.bridge.socket_addr()?,
            self.config.bridge.connect_timeout(),
        )
        .with_max_payload_bytes(self.config.bridge.max_payload_bytes))
    }
}

fn load_or_init_config(paths: &AppPaths, common: &CommonOpts) -> Result<(AppConfig, bool)> {
    let mut created = false;
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            config::write_default_config(&paths.config_file)?;
            created = true;
        }
    }
    Ok((config::load_config(&paths.config_file)?, created))
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut server = ctx.config.server.clone();
    if let Some(host) = cmd.host {
        server.host = host;
    }
    if let Some(port) = cmd.port {
        server.port = port;
    }
    let addr = server.socket_addr()?;

    let database = Database::new(&ctx.paths.database_file()).await?;
    let sessions = SessionRepository::new(database.pool().clone());

    let generator: Option<Arc<dyn CodeGenerator>> = match ctx.config.generator.gemini() {
        Some(gemini) => {
            let client = GeminiClient::new(gemini).context("creating Gemini client")?;
            info!("Code generation enabled with model {}", client.model());
            Some(Arc::new(client))
        }
        None => {
            warn!(
                "{} not set; /generate will answer 503 until an API key is configured",
                config::API_KEY_ENV
            );
            None
        }
    };

    let bridge = ctx.bridge_client()?;
    info!("Forwarding scripts to bridge at {}", bridge.addr());

    let state = api::AppState::new(sessions, generator, bridge)
        .with_allowed_origins(server.allowed_origins.clone());
    let app = api::create_router(state);

    info!("Listening on http://{}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}

/// Runs the bridge with the headless host. The host lives on this thread;
/// the listener gets a runtime of its own.
fn handle_bridge(ctx: &RuntimeContext, cmd: BridgeCommand) -> Result<()> {
    let mut bridge_config = ctx.config.bridge.clone();
    if let Some(interpreter) = cmd.interpreter {
        bridge_config.interpreter = Some(interpreter);
    }
    if let Some(port) = cmd.port {
        bridge_config.port = port;
    }
    let settings = bridge_config.settings(&ctx.paths.data_dir)?;

    if ctx.common.dry_run {
        info!(
            "dry-run: would run bridge on {} exporting to {}",
            settings.addr,
            settings.export_dir.display()
        );
        return Ok(());
    }

    let mut host = HeadlessHost::new();
    if let Some(interpreter) = bridge_config.interpreter()? {
        info!("Piping scripts to {}", interpreter.program);
        host = host.with_interpreter(interpreter);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cadlink-listener")
        .build()
        .context("creating listener runtime")?;

    let shutdown = CancellationToken::new();
    let attached = Bridge::new(settings).attach(host);

    let Some(socket) = runtime
        .block_on(attached.listener().bind())
        .context("binding bridge listener")?
    else {
        warn!("Another bridge owns {}; not starting", attached.listener().addr());
        return Ok(());
    };

    runtime.spawn(wait_for_signal(shutdown.clone()));

    match attached {
        Attached::Scheduled {
            listener,
            mut dispatcher,
        } => {
            let serving = runtime.spawn(listener.serve(socket, shutdown.clone()));
            dispatcher.run(&shutdown);
            runtime
                .block_on(serving)
                .context("joining bridge listener")?
                .context("bridge listener failed")?;
        }
        Attached::Direct { listener } => {
            runtime
                .block_on(listener.serve(socket, shutdown))
                .context("bridge listener failed")?;
        }
    }

    info!("Bridge stopped");
    Ok(())
}

async fn handle_send(ctx: &RuntimeContext, cmd: SendCommand) -> Result<()> {
    let code = match cmd.file.as_deref() {
        None => read_stdin()?,
        Some(path) if path.as_os_str() == "-" => read_stdin()?,
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?,
    };
    if code.trim().is_empty() {
        bail!("refusing to send an empty script");
    }

    let client = ctx.bridge_client()?;
    if ctx.common.dry_run {
        info!("dry-run: would send {} bytes to {}", code.len(), client.addr());
        return Ok(());
    }

    client
        .send_script(&code)
        .await
        .with_context(|| format!("sending script to {}", client.addr()))?;
    report(ctx, "queued", code.len());
    Ok(())
}

async fn handle_sync(ctx: &RuntimeContext, cmd: SyncCommand) -> Result<()> {
    let client = ctx.bridge_client()?;
    if ctx.common.dry_run {
        info!(
            "dry-run: would sync {:?} -> {} via {}",
            cmd.previous,
            cmd.current_id,
            client.addr()
        );
        return Ok(());
    }

    client
        .request_sync(cmd.previous.as_deref(), &cmd.current_id)
        .await
        .with_context(|| format!("requesting session sync from {}", client.addr()))?;
    report(ctx, "queued", cmd.current_id.len());
    Ok(())
}

fn report(ctx: &RuntimeContext, status: &str, bytes: usize) {
    if ctx.common.json {
        println!("{}", serde_json::json!({ "status": status, "bytes": bytes }));
    } else if !ctx.common.quiet {
        println!("{status}");
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading script from stdin")?;
    Ok(buffer)
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.created_config {
        println!("{}", ctx.paths.config_file.display());
        return Ok(());
    }
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    config::write_default_config(&ctx.paths.config_file)?;
    println!("{}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            config::write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(wait_for_signal(shutdown));
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => return,
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
