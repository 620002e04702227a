// CLI module - User-facing command-line interface

mod output;

use crate::config::Config;
use crate::control::Action;
use crate::error::{OverseerError, Result};
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::{Command, DaemonCommand, ResponseData};
use crate::ipc::DEFAULT_SOCKET_PATH;
use crate::monitor::compile_events;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Overseer - a dependency-aware process supervisor
#[derive(Parser)]
#[command(name = "overseer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Control socket of the daemon
    #[arg(short, long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a process, a group, or all (dependencies first)
    Start {
        /// Process name, group name, or `all`
        target: String,
    },

    /// Stop a process, a group, or all (dependents first)
    Stop { target: String },

    /// Restart a process, a group, or all
    Restart { target: String },

    /// Enable monitoring without starting anything
    Monitor { target: String },

    /// Disable monitoring without stopping anything
    Unmonitor { target: String },

    /// Show process status
    Status {
        /// Process name, group name, or `all` (default)
        target: Option<String>,
    },

    /// Validate a configuration file without contacting the daemon
    Check {
        /// Path to a TOML or JSON configuration file
        config: PathBuf,
    },

    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Check daemon status
    Status,
    /// Ask the daemon to shut down
    Shutdown,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        let Some(command) = self.build_command() else {
            if let Commands::Check { config } = &self.command {
                return check_config(config);
            }
            return Ok(());
        };

        let client = IpcClient::with_socket_path(&self.socket);
        let data = match client.request(command) {
            Ok(data) => data,
            Err(OverseerError::Rejected(message)) => {
                output::print_error(&message);
                return Err(OverseerError::Rejected(message));
            }
            Err(e) => return Err(e),
        };

        output::print_success(&data);
        if let ResponseData::ActionApplied { outcomes, .. } = &data {
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            if failed > 0 {
                return Err(OverseerError::Other(format!(
                    "{} of {} processes failed",
                    failed,
                    outcomes.len()
                )));
            }
        }
        Ok(())
    }

    /// Build an IPC command from the CLI arguments; `None` for local-only commands
    fn build_command(&self) -> Option<Command> {
        let control = |action: Action, target: &String| Command::Control {
            action,
            target: target.clone(),
        };

        let command = match &self.command {
            Commands::Start { target } => control(Action::Start, target),
            Commands::Stop { target } => control(Action::Stop, target),
            Commands::Restart { target } => control(Action::Restart, target),
            Commands::Monitor { target } => control(Action::Monitor, target),
            Commands::Unmonitor { target } => control(Action::Unmonitor, target),
            Commands::Status { target } => Command::Status {
                target: target.clone(),
            },
            Commands::Daemon { command } => Command::Daemon(match command {
                DaemonCommands::Status => DaemonCommand::Status,
                DaemonCommands::Shutdown => DaemonCommand::Shutdown,
            }),
            Commands::Check { .. } => return None,
        };
        Some(command)
    }
}

/// Load a configuration, build its registry and compile its rules
fn check_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    let registry = config.build_registry()?;
    let (events, errors) = compile_events(&registry);

    output::print_check_report(registry.len(), registry.groups().len(), events.len(), &errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(OverseerError::ConfigValidationError(format!(
            "{} rule(s) failed to compile",
            errors.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("overseer").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_control_commands() {
        let cli = parse(&["restart", "backend"]);
        assert_eq!(
            cli.build_command(),
            Some(Command::Control {
                action: Action::Restart,
                target: "backend".to_string()
            })
        );

        let cli = parse(&["unmonitor", "all"]);
        assert_eq!(
            cli.build_command(),
            Some(Command::Control {
                action: Action::Unmonitor,
                target: "all".to_string()
            })
        );
    }

    #[test]
    fn test_status_and_socket() {
        let cli = parse(&["status"]);
        assert_eq!(cli.build_command(), Some(Command::Status { target: None }));
        assert_eq!(cli.socket, PathBuf::from(DEFAULT_SOCKET_PATH));

        let cli = parse(&["--socket", "/run/o.sock", "status", "db"]);
        assert_eq!(
            cli.build_command(),
            Some(Command::Status {
                target: Some("db".to_string())
            })
        );
        assert_eq!(cli.socket, PathBuf::from("/run/o.sock"));
    }

    #[test]
    fn test_check_is_local() {
        let cli = parse(&["check", "overseer.toml"]);
        assert_eq!(cli.build_command(), None);
    }

    #[test]
    fn test_missing_target_is_rejected() {
        assert!(Cli::try_parse_from(["overseer", "start"]).is_err());
    }

    #[test]
    fn test_check_config() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.toml");
        fs::write(
            &good,
            r#"
[[groups]]
name = "backend"

[[groups.processes]]
name = "db"
start = "exec sleep 60"

[[groups.events]]
rule = "memory_used > 512mb"
action = "restart"
"#,
        )
        .unwrap();
        assert!(check_config(&good).is_ok());

        let bad = temp_dir.path().join("bad.toml");
        fs::write(
            &bad,
            r#"
[[groups]]
name = "backend"

[[groups.processes]]
name = "db"
start = "exec sleep 60"

[[groups.events]]
rule = "disk_used > 512mb"
action = "restart"
"#,
        )
        .unwrap();
        assert!(matches!(
            check_config(&bad),
            Err(OverseerError::ConfigValidationError(_))
        ));
    }
}
