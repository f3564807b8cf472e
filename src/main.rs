//! voxtask - task manager client
//!
//! A terminal front end for the task backend. Sessions persist between runs
//! and are refreshed automatically when the backend rejects an expired
//! credential.
//!
//! Available as the `voxtask` command.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use voxtask::api::error_handler::user_message;
use voxtask::cli::commands::{Cli, Commands};
use voxtask::cli::{auth, config, task};
use voxtask::core::config::Config;
use voxtask::core::context::AppContext;
use voxtask::error::{Result, VoxtaskError};

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        handle_error(&e);
        std::process::exit(1);
    }
}

/// Print an error the way a user should see it
fn handle_error(e: &VoxtaskError) {
    eprintln!("Error: {}", user_message(e));

    let fields = e.field_errors();
    if !fields.is_empty() {
        eprintln!();
        for field in fields {
            eprintln!("  • {}: {}", field.field, field.message);
        }
    }

    if let Some(seconds) = e.retry_after() {
        eprintln!();
        eprintln!("  → Too many attempts. Try again in {} seconds.", seconds);
    }

    if matches!(e, VoxtaskError::SessionExpired(_) | VoxtaskError::NotAuthenticated) {
        eprintln!();
        eprintln!("  → Run 'voxtask auth login --email <EMAIL>' to sign in.");
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Config commands don't need a backend
        Commands::Config(args) => config::handle_config(args.command),

        command => {
            let ctx = AppContext::from_config(Config::load()?)?;
            match command {
                Commands::Auth(args) => auth::handle_auth(&ctx, args.command).await,
                Commands::Task(args) => task::handle_task(&ctx, args.command).await,
                Commands::Config(_) => unreachable!(),
            }
        }
    }
}
