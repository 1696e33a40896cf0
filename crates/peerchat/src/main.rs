use std::env;
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{TimeZone, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};

use peerchat::api::ServerConfig;
use peerchat::fetch::HttpPeerFetcher;
use peerchat::history::{HistoryConfig, HistoryStore};
use peerchat::local::EngineConfig;
use peerchat::sync::SyncConfig;
use peerchat::{NodeConfig, PeerRuntime, RuntimeConfig};
use peerchat_protocol::{Message, PeerKey};

const APP_NAME: &str = "peerchat";

const DEFAULT_HISTORY_FILE: &str = "messages.json";

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
async fn async_fetch(ctx: RuntimeContext, cmd: FetchCommand) -> Result<()> {
    handle_fetch(&ctx, cmd).await
}

#[tokio::main]
async fn async_history(ctx: RuntimeContext, command: HistoryCommand) -> Result<()> {
    handle_history(&ctx, command).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Fetch(cmd) => async_fetch(ctx, cmd),
        Command::History { command } => async_history(ctx, command),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Peerchat - peer-to-peer chat history sync node.",
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
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run this peer: serve history, sync with peers, supervise the chat engine
    Serve(ServeCommand),
    /// Fetch a peer's history once and print it
    Fetch(FetchCommand),
    /// Inspect the local history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
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
    /// Address other peers reach this node at
    #[arg(long, env = "PEERCHAT_IP")]
    ip: Option<String>,
    /// Address the history server listens on
    #[arg(long, env = "PEERCHAT_BIND")]
    bind: Option<String>,
    /// Port to bind (0 picks a free port)
    #[arg(long, env = "PEERCHAT_PORT")]
    port: Option<u16>,
    /// Display name passed to the chat engine
    #[arg(long)]
    name: Option<String>,
    /// Chat room passed to the chat engine
    #[arg(long)]
    room: Option<String>,
    /// Do not run the sync loop
    #[arg(long = "no-sync")]
    no_sync: bool,
    /// Do not launch the chat engine
    #[arg(long = "no-engine")]
    no_engine: bool,
}

#[derive(Debug, Clone, Args)]
struct FetchCommand {
    /// Peer address as IP:PORT
    #[arg(value_name = "IP:PORT")]
    peer: PeerKey,
    /// Seconds to wait for the peer (defaults to sync.fetch_timeout_secs)
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    /// Print the local history
    Show,
    /// Replace the local history with an empty log
    Clear,
    /// Print the resolved history file path
    Path,
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

#[derive(Debug)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&mut paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
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

        let max_level = self.effective_log_level();
        let level = match max_level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("peerchat={level},tower_http={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            let located = max_level >= LevelFilter::Debug;

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(located)
                        .with_file(located)
                        .with_line_number(located),
                )
                .try_init()
                .ok();
        }

        // `try_init` also installs the `log` bridge, so the library's `log`
        // records go through the same filter and writer.
        Ok(())
    }

    /// CLI flags win; otherwise `logging.level` from the config.
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
                "dry-run: would ensure data dir {}",
                self.paths.data_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        Ok(())
    }

    /// History file, resolved against the data directory.
    fn history_file(&self) -> Result<PathBuf> {
        match self.config.history.file.as_deref() {
            Some(file) => {
                let expanded = expand_str_path(file)?;
                if expanded.is_absolute() {
                    Ok(expanded)
                } else {
                    Ok(self.paths.data_dir.join(expanded))
                }
            }
            None => Ok(self.paths.data_dir.join(DEFAULT_HISTORY_FILE)),
        }
    }

    fn history_store(&self) -> Result<HistoryStore> {
        Ok(HistoryStore::new(self.history_file()?))
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => user_dir(UserDir::Config)?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            data_dir: user_dir(UserDir::Data)?,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    paths: PathsConfig,
    /// This peer's identity.
    node: NodeConfig,
    /// Local history file.
    history: HistoryConfig,
    /// History server rate limiting.
    server: ServerConfig,
    /// Anti-entropy sync loop.
    sync: SyncConfig,
    /// External chat engine.
    engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PathsConfig {
    data_dir: Option<String>,
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut node = ctx.config.node.clone();
    if let Some(ip) = cmd.ip {
        node.ip = ip;
    }
    if let Some(bind) = cmd.bind {
        node.bind = bind;
    }
    if let Some(port) = cmd.port {
        node.port = port;
    }
    if let Some(name) = cmd.name {
        node.display_name = name;
    }
    if let Some(room) = cmd.room {
        node.room = room;
    }

    let mut sync = ctx.config.sync.clone();
    sync.enabled &= !cmd.no_sync;
    let mut engine = ctx.config.engine.clone();
    engine.enabled &= !cmd.no_engine;

    let config = RuntimeConfig {
        node,
        history_file: ctx.history_file()?,
        reset_on_start: ctx.config.history.reset_on_start,
        server: ctx.config.server.clone(),
        sync,
        engine,
    };

    if ctx.common.dry_run {
        info!(
            "dry-run: would start peer {}:{} on {} with history at {} (sync: {}, engine: {})",
            config.node.ip,
            config.node.port,
            config.node.bind,
            config.history_file.display(),
            config.sync.enabled,
            config.engine.enabled
        );
        return Ok(());
    }

    let runtime = PeerRuntime::start(config).await?;
    if ctx.common.json {
        println!(
            "{}",
            serde_json::json!({ "peer": runtime.self_key().to_string() })
        );
    }
    runtime.run_until_signal().await
}

async fn handle_fetch(ctx: &RuntimeContext, cmd: FetchCommand) -> Result<()> {
    let timeout = cmd
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.sync.fetch_timeout());
    let fetcher = HttpPeerFetcher::new().context("building HTTP client")?;
    let history = fetcher
        .fetch_history(&cmd.peer, timeout)
        .await
        .with_context(|| format!("fetching history from {}", cmd.peer))?;
    print_history(ctx, &history)
}

async fn handle_history(ctx: &RuntimeContext, command: HistoryCommand) -> Result<()> {
    let store = ctx.history_store()?;
    match command {
        HistoryCommand::Show => {
            let history = store.load_or_empty().await;
            print_history(ctx, &history)
        }
        HistoryCommand::Clear => {
            if ctx.common.dry_run {
                info!("dry-run: would clear history at {}", store.path().display());
                return Ok(());
            }
            store
                .clear()
                .await
                .with_context(|| format!("clearing history at {}", store.path().display()))?;
            info!("Cleared history at {}", store.path().display());
            Ok(())
        }
        HistoryCommand::Path => {
            println!("{}", store.path().display());
            Ok(())
        }
    }
}

fn print_history(ctx: &RuntimeContext, history: &[Message]) -> Result<()> {
    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(history).context("serializing history to JSON")?
        );
    } else if ctx.common.yaml {
        println!(
            "{}",
            serde_yaml::to_string(history).context("serializing history to YAML")?
        );
    } else if history.is_empty() {
        println!("(no messages)");
    } else {
        for message in history {
            println!("{}", format_message(message));
        }
    }
    Ok(())
}

fn format_message(message: &Message) -> String {
    let when = Utc
        .timestamp_opt(message.timestamp, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| message.timestamp.to_string());
    format!(
        "[{}] {} ({}:{}): {}",
        when, message.author, message.sender_ip, message.sender_port, message.content
    )
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
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

    write_default_config(&ctx.paths.config_file)
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
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let config: AppConfig = built.try_deserialize()?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Environment overrides use PEERCHAT__SECTION__KEY, e.g. PEERCHAT__NODE__PORT=9001\n");
    buffer.push_str("# engine.args placeholders: {ip} {port} {name} {room} {history}\n");
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

#[derive(Debug, Clone, Copy)]
enum UserDir {
    Config,
    Data,
}

/// Per-user directory for this app: the XDG variable when set, then the
/// platform default, then the XDG fallback under `$HOME`.
fn user_dir(kind: UserDir) -> Result<PathBuf> {
    let (xdg_var, platform, home_relative) = match kind {
        UserDir::Config => ("XDG_CONFIG_HOME", dirs::config_dir(), ".config"),
        UserDir::Data => ("XDG_DATA_HOME", dirs::data_dir(), ".local/share"),
    };

    env::var_os(xdg_var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or(platform)
        .or_else(|| dirs::home_dir().map(|home| home.join(home_relative)))
        .map(|base| base.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine {kind:?} directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}",
            self.config_file.display(),
            self.data_dir.display()
        )
    }
}
