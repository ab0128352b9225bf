use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cotimer", version, about = "Shared pomodoro timer CLI")]
struct Cli {
    /// Acting user id (falls back to COTIMER_USER)
    #[arg(long, global = true)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timer control
    Timer {
        #[command(subcommand)]
        action: commands::timer::TimerAction,
    },
    /// Membership management
    Member {
        #[command(subcommand)]
        action: commands::member::MemberAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Refresh every timer periodically and stream state changes as JSON lines
    Watch(commands::watch::WatchArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Timer { action } => commands::timer::run(cli.user, action),
        Commands::Member { action } => commands::member::run(cli.user, action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Watch(args) => commands::watch::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
