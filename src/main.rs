use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stopkran::cli;
use stopkran::config::{self, Config};
use stopkran::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "stopkran")]
#[command(version, about = "Remote approval of coding-agent permission requests")]
struct Cli {
    /// Config file path (default: ~/.config/stopkran/config.yml)
    #[arg(long, global = true, env = "STOPKRAN_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON lines.
    #[arg(long, global = true, env = "STOPKRAN_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the mediation daemon.
    Daemon,

    /// Forward one permission event from stdin to the daemon (hook entry point).
    Hook {
        /// Socket path override.
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Pause remote mediation; requests fall back to the agent's own prompt.
    Pause,

    /// Resume remote mediation.
    Resume,

    /// Show pause state and whether the daemon is running.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Daemon => "stopkran=info",
        _ => "stopkran=warn",
    };
    init_tracing(default_filter, cli.log_json);

    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Hook { socket } => {
            // The hook must never fail loudly; a broken config just means no
            // mediation.
            let config = Config::load(&config_path).unwrap_or_default();
            let socket = socket.unwrap_or_else(|| config.socket_path.clone());
            cli::hook::run_hook(socket, config.hook_timeout_secs()).await?;
        }
        Commands::Daemon => {
            let config = Config::load(&config_path)?;
            cli::daemon::run_daemon(config, &config_path).await?;
        }
        Commands::Pause => cli::pause::run_pause(&Config::load(&config_path)?).await?,
        Commands::Resume => cli::pause::run_resume(&Config::load(&config_path)?).await?,
        Commands::Status => cli::pause::run_status(&Config::load(&config_path)?).await?,
    }

    Ok(())
}
