//! CLI command definitions using clap
//!
//! Defines the command structure for the `voxtask` CLI tool.

use clap::{Parser, Subcommand, ValueEnum};

use crate::core::config;

/// voxtask - task manager client
///
/// Sign in, then list, add and complete tasks from the terminal.
#[derive(Parser, Debug)]
#[command(name = "voxtask", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in, sign out and manage the account
    Auth(AuthArgs),

    /// Manage tasks
    Task(TaskArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication commands
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(long, short)]
        email: String,

        /// Account password (prompted when omitted)
        #[arg(long, env = "VOXTASK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account and sign in
    Register {
        /// Display name
        #[arg(long, short)]
        username: String,

        /// Account email
        #[arg(long, short)]
        email: String,

        /// Account password (prompted when omitted)
        #[arg(long, env = "VOXTASK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Sign out and remove the stored session
    Logout,

    /// Show current session status
    Status,

    /// Exchange the current credential for a fresh one
    Refresh,

    /// Show or update the profile
    Profile {
        /// New display name
        #[arg(long)]
        username: Option<String>,

        /// New email
        #[arg(long)]
        email: Option<String>,

        /// Change the password (prompts for current and new)
        #[arg(long)]
        password: bool,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Task Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Task commands
#[derive(Parser, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// List tasks
    List {
        /// Filter by state
        #[arg(long, default_value = "all")]
        state: TaskState,

        /// Page to show (1-based)
        #[arg(long)]
        page: Option<u32>,

        /// Maximum number of tasks to show
        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },

    /// Show one task
    Show {
        /// Task id
        id: String,
    },

    /// Add a task
    Add {
        /// What to do
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Mark a task as done
    Done {
        /// Task id
        id: String,
    },

    /// Mark a task as not done
    Undo {
        /// Task id
        id: String,
    },

    /// Change a task's text
    Edit {
        /// Task id
        id: String,

        /// New text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Delete a task
    Rm {
        /// Task id
        id: String,

        /// Skip confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Show task counters
    Stats,

    /// Show recent task activity
    History {
        /// Forget the recorded activity instead
        #[arg(long)]
        clear: bool,
    },
}

/// Task state filter
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum TaskState {
    /// Only open tasks
    Pending,
    /// Only completed tasks
    Done,
    /// Every task
    #[default]
    All,
}

impl TaskState {
    /// Value for the `done` query parameter
    pub fn done_filter(&self) -> Option<bool> {
        match self {
            TaskState::Pending => Some(false),
            TaskState::Done => Some(true),
            TaskState::All => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration commands
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: ConfigKey,

        /// Configuration value
        value: String,
    },

    /// Print the configuration file path
    Path,
}

/// Available configuration keys
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ConfigKey {
    /// Backend base URL
    #[value(name = "api-url")]
    ApiUrl,

    /// Per-attempt timeout in milliseconds
    #[value(name = "timeout-ms")]
    TimeoutMs,

    /// Attempts per call, including the first
    #[value(name = "retry-attempts")]
    RetryAttempts,

    /// Backoff base in milliseconds
    #[value(name = "retry-delay-ms")]
    RetryDelayMs,

    /// Seconds before expiry to warn
    #[value(name = "refresh-warning-secs")]
    RefreshWarningSecs,

    /// Seconds before expiry to refresh automatically
    #[value(name = "refresh-auto-secs")]
    RefreshAutoSecs,

    /// Expiry check period in seconds
    #[value(name = "check-interval-secs")]
    CheckIntervalSecs,

    /// Session storage: keyring, file or memory
    #[value(name = "store")]
    Store,
}

impl From<ConfigKey> for config::ConfigKey {
    fn from(key: ConfigKey) -> Self {
        match key {
            ConfigKey::ApiUrl => config::ConfigKey::ApiUrl,
            ConfigKey::TimeoutMs => config::ConfigKey::TimeoutMs,
            ConfigKey::RetryAttempts => config::ConfigKey::RetryAttempts,
            ConfigKey::RetryDelayMs => config::ConfigKey::RetryDelayMs,
            ConfigKey::RefreshWarningSecs => config::ConfigKey::RefreshWarningSecs,
            ConfigKey::RefreshAutoSecs => config::ConfigKey::RefreshAutoSecs,
            ConfigKey::CheckIntervalSecs => config::ConfigKey::CheckIntervalSecs,
            ConfigKey::Store => config::ConfigKey::Store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_task_add_joins_words() {
        let cli = Cli::try_parse_from(["voxtask", "task", "add", "buy", "milk"]).unwrap();
        match cli.command {
            Commands::Task(TaskArgs {
                command: TaskCommand::Add { text },
            }) => assert_eq!(text.join(" "), "buy milk"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_filter() {
        let cli = Cli::try_parse_from(["voxtask", "task", "list", "--state", "done", "-n", "5"])
            .unwrap();
        match cli.command {
            Commands::Task(TaskArgs {
                command: TaskCommand::List { state, limit, .. },
            }) => {
                assert_eq!(state.done_filter(), Some(true));
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_history_clear() {
        let cli = Cli::try_parse_from(["voxtask", "task", "history", "--clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Task(TaskArgs {
                command: TaskCommand::History { clear: true },
            })
        ));
    }
}
