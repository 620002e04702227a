// Output formatting and display for CLI

use crate::control::{Action, MonitorState};
use crate::error::OverseerError;
use crate::ipc::protocol::{ActionOutcome, ProcessInfo, ResponseData};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::ActionApplied { action, outcomes } => {
            print_outcomes(*action, outcomes);
        }

        ResponseData::Status(processes) => {
            if processes.is_empty() {
                println!("{}", "No processes configured".yellow());
            } else {
                print_process_table(processes);
            }
        }

        ResponseData::DaemonStatus { running, uptime } => {
            if *running {
                println!("{}", "✓ Daemon is running".green().bold());
                println!("  {}: {}", "Uptime".bold(), format_duration(uptime));
            } else {
                println!("{}", "✗ Daemon is not running".red().bold());
            }
        }

        ResponseData::Success(message) => {
            println!("{} {}", "✓".green().bold(), message);
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

fn print_outcomes(action: Action, outcomes: &[ActionOutcome]) {
    for outcome in outcomes {
        match outcome.error {
            None => println!(
                "{} {} {}",
                "✓".green().bold(),
                action,
                outcome.process.cyan()
            ),
            Some(ref error) => eprintln!(
                "{} {} {}: {}",
                "✗".red().bold(),
                action,
                outcome.process.cyan(),
                error
            ),
        }
    }
}

pub fn print_check_report(processes: usize, groups: usize, rules: usize, errors: &[OverseerError]) {
    println!(
        "{} {} process(es) in {} group(s), {} rule(s)",
        "ℹ".blue().bold(),
        processes,
        groups,
        rules
    );
    for error in errors {
        eprintln!("{} {}", "✗".red().bold(), error);
    }
    if errors.is_empty() {
        println!("{}", "✓ Configuration is valid".green().bold());
    }
}

/// Print a formatted table of processes
fn print_process_table(processes: &[ProcessInfo]) {
    #[derive(Tabled)]
    struct ProcessRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Group")]
        group: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Monitor")]
        monitor: String,
        #[tabled(rename = "Mode")]
        mode: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Starts")]
        starts: String,
    }

    let rows: Vec<ProcessRow> = processes
        .iter()
        .map(|p| ProcessRow {
            name: truncate(&p.status.name, 20),
            group: truncate(&p.status.group, 16),
            state: format_running(p.status.running),
            pid: p
                .status
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            monitor: format_monitor_colored(p.status.monitor),
            mode: p.status.mode.to_string(),
            cpu: p
                .cpu_percent
                .map(|cpu| format!("{:.1}%", cpu))
                .unwrap_or_else(|| "-".to_string()),
            memory: p
                .memory_bytes
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string()),
            starts: p.status.starts.to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", processes.len())
            .dimmed()
            .italic()
    );
}

fn format_running(running: bool) -> String {
    if running {
        "running".green().to_string()
    } else {
        "stopped".bright_black().to_string()
    }
}

fn format_monitor_colored(state: MonitorState) -> String {
    match state {
        MonitorState::Monitored => state.to_string().green().to_string(),
        MonitorState::Initializing => state.to_string().yellow().to_string(),
        MonitorState::PendingAction => state.to_string().yellow().bold().to_string(),
        MonitorState::Unmonitored => state.to_string().bright_black().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
