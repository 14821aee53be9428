use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};

use rosterbot::config::{APP_NAME, BotConfig, Credentials, write_default_config};
use rosterbot::db::Database;
use rosterbot::roster::RosterCollector;
use rosterbot::session::{SessionController, SessionResult};
use rosterbot::user::{UserRecord, UserRepository};

fn main() {
    let result = try_main();
    if let Err(ref err) = result {
        let _ = writeln!(io::stderr(), "{err:?}");
    }
    std::process::exit(exit_code(&result));
}

#[tokio::main]
async fn async_run(ctx: RuntimeContext) -> Result<()> {
    handle_run(&ctx).await
}

#[tokio::main]
async fn async_users(ctx: RuntimeContext, cmd: UsersCommand) -> Result<()> {
    handle_users(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone(), cli.command.creates_config())?;
    ctx.init_logging();
    debug!("config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Run => async_run(ctx),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Users { command } => async_users(ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

/// Process exit status for a finished command.
fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Rosterbot - collects chat group member rosters into Postgres.",
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
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging
    #[arg(long, global = true)]
    trace: bool,
    /// JSON logs and JSON output
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Color mode for log output
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the chat bridge and collect rosters until interrupted
    Run,
    /// Create the default config file
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Inspect stored user records
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// Whether a missing config file is written before the command runs.
    fn creates_config(&self) -> bool {
        matches!(self, Command::Run | Command::Users { .. })
    }
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Overwrite an existing config file
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print the config file path
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    /// Print the number of stored users
    Count,
    /// List stored users ordered by jid
    List {
        /// Maximum number of rows
        #[arg(short, long, default_value = "50")]
        limit: i64,
        /// Rows to skip
        #[arg(short, long, default_value = "0")]
        offset: i64,
    },
    /// Show one user
    Show {
        /// User jid
        jid: String,
    },
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: BotConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts, create_config: bool) -> Result<Self> {
        let config_file = config_file_path(common.config.as_deref())?;
        if create_config && !config_file.exists() {
            write_default_config(&config_file)?;
        }
        let config = BotConfig::load(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.log_level();
        let level_name = level.as_str().to_ascii_lowercase();

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "rosterbot={level_name},rosterbot_protocol={level_name}"
            ))
        });
        let registry = tracing_subscriber::registry().with(filter);
        let installed = if self.common.json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry
                .with(fmt::layer().with_ansi(self.use_color()))
                .try_init()
        };

        // env_logger only takes over when no tracing subscriber could be set
        if installed.is_err() {
            env_logger::Builder::new()
                .filter_module("rosterbot", level)
                .try_init()
                .ok();
        }
    }

    fn log_level(&self) -> LevelFilter {
        let common = &self.common;
        if common.quiet {
            return LevelFilter::Error;
        }
        if common.trace || common.verbose >= 2 {
            return LevelFilter::Trace;
        }
        if common.debug || common.verbose == 1 {
            return LevelFilter::Debug;
        }
        LevelFilter::from_str(&self.config.logging.level).unwrap_or(LevelFilter::Info)
    }

    fn use_color(&self) -> bool {
        if self.common.no_color {
            return false;
        }
        match self.common.color {
            ColorOption::Always => true,
            ColorOption::Never => false,
            ColorOption::Auto => env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal(),
        }
    }

    fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("serializing output to JSON")?
        );
        Ok(())
    }
}

/// How a bot run ended.
#[derive(Debug)]
enum RunEnd {
    /// SIGINT or SIGTERM arrived.
    Interrupted,
    /// The chat session stopped on its own.
    SessionEnded(SessionResult<()>),
}

impl RunEnd {
    fn into_result(self) -> Result<()> {
        match self {
            RunEnd::Interrupted => {
                info!("Shutdown signal received, stopping bot");
                Ok(())
            }
            RunEnd::SessionEnded(Ok(())) => Err(anyhow!("chat session ended unexpectedly")),
            RunEnd::SessionEnded(Err(e)) => Err(anyhow::Error::new(e).context("chat session failed")),
        }
    }
}

async fn handle_run(ctx: &RuntimeContext) -> Result<()> {
    let credentials = ctx.config.chat.credentials()?;

    let database = Database::connect(&ctx.config.database)
        .await
        .context("initializing database")?;
    let repository = UserRepository::new(database.pool().clone());

    let result = run_session(ctx, &credentials, repository).await;
    database.close().await;
    result
}

async fn run_session(
    ctx: &RuntimeContext,
    credentials: &Credentials,
    repository: UserRepository,
) -> Result<()> {
    let mut controller = SessionController::connect(&ctx.config.chat).await?;
    let collector = RosterCollector::new(Arc::new(repository), Arc::new(controller.handle()));

    controller.authenticate(credentials).await?;

    let end = tokio::select! {
        result = controller.run(&collector) => RunEnd::SessionEnded(result),
        _ = shutdown_signal() => RunEnd::Interrupted,
    };
    end.into_result()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn handle_users(ctx: &RuntimeContext, cmd: UsersCommand) -> Result<()> {
    let database = Database::connect(&ctx.config.database)
        .await
        .context("initializing database")?;
    let repository = UserRepository::new(database.pool().clone());

    let result = match cmd {
        UsersCommand::Count => repository.count().await.map(|count| println!("{count}")),
        UsersCommand::List { limit, offset } => {
            let users = repository.list(limit, offset).await?;
            if ctx.common.json {
                ctx.print_json(&users)
            } else {
                print_user_table(&users);
                Ok(())
            }
        }
        UsersCommand::Show { jid } => match repository.get(&jid).await? {
            Some(user) if ctx.common.json => ctx.print_json(&user),
            Some(user) => {
                print_user_table(std::slice::from_ref(&user));
                Ok(())
            }
            None => Err(anyhow!("user not found: {jid}")),
        },
    };

    database.close().await;
    result
}

fn print_user_table(users: &[UserRecord]) {
    if users.is_empty() {
        println!("No users stored.");
        return;
    }

    println!("{:<40} {:<24} {:<32}", "JID", "USERNAME", "DISPLAY NAME");
    for user in users {
        println!(
            "{:<40} {:<24} {:<32}",
            user.jid,
            user.username.as_deref().unwrap_or("-"),
            user.display_name.as_deref().unwrap_or("-")
        );
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.config_file.display()
        ));
    }

    write_default_config(&ctx.config_file)?;
    info!("Wrote default config to {}", ctx.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show if ctx.common.json => ctx.print_json(&ctx.config.redacted()),
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(&ctx.config.redacted())
                .context("serializing config to TOML")?;
            print!("{toml}");
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => write_default_config(&ctx.config_file),
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

/// Resolve the config file: `--config` (a file, or a directory holding
/// `config.toml`) or `<config dir>/rosterbot/config.toml`.
fn config_file_path(override_path: Option<&Path>) -> Result<PathBuf> {
    let Some(path) = override_path else {
        return Ok(default_config_dir()?.join("config.toml"));
    };

    let text = path.to_string_lossy();
    let expanded = shellexpand::full(&text).context("expanding config path")?;
    let path = PathBuf::from(expanded.into_owned());
    if path.is_dir() {
        Ok(path.join("config.toml"))
    } else {
        Ok(path)
    }
}

fn default_config_dir() -> Result<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|base| base.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}
