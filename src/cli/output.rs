// Output formatting and display for the CLI

use crate::ipc::ResponseData;
use crate::process::{InstanceSnapshot, InstanceStatus};
use colored::*;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Started(snapshots) => {
            println!("{}", "✓ Started".green().bold());
            print_status_table(snapshots);
        }

        ResponseData::Stopped { name, count } => {
            println!(
                "{}",
                format!("✓ Stopped {} instance(s) of '{}'", count, name)
                    .green()
                    .bold()
            );
        }

        ResponseData::Restarted { name, count } => {
            println!(
                "{}",
                format!("✓ Restarted {} instance(s) of '{}'", count, name)
                    .green()
                    .bold()
            );
        }

        ResponseData::Status(snapshots) => {
            if snapshots.is_empty() {
                println!("{}", "No applications are registered".yellow());
            } else {
                print_status_table(snapshots);
            }
        }

        ResponseData::DaemonStatus {
            pid,
            uptime_secs,
            instances,
        } => {
            println!("{}", "✓ Daemon is running".green().bold());
            println!("  {}: {}", "PID".bold(), pid);
            println!("  {}: {}", "Uptime".bold(), format_duration(*uptime_secs));
            println!("  {}: {}", "Instances".bold(), instances);
        }

        ResponseData::ShuttingDown => {
            println!("{}", "✓ Daemon is shutting down".green().bold());
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

fn print_status_table(snapshots: &[InstanceSnapshot]) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "App")]
        app: String,
        #[tabled(rename = "Instance")]
        slot: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
    }

    let rows: Vec<StatusRow> = snapshots
        .iter()
        .map(|s| StatusRow {
            app: truncate(&s.app, 20),
            slot: truncate(&s.slot, 24),
            status: format_status_colored(s.status),
            pid: s
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: if s.memory_bytes > 0 {
                format_memory(s.memory_bytes)
            } else {
                "-".to_string()
            },
            uptime: format_duration(s.uptime_secs()),
            restarts: format_restarts(s),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);

    let dropped: u64 = snapshots.iter().map(|s| s.dropped_log_lines).sum();
    if dropped > 0 {
        println!(
            "{}",
            format!("⚠ {} log line(s) dropped under backpressure", dropped).yellow()
        );
    }
}

fn format_status_colored(status: InstanceStatus) -> String {
    let text = status.to_string();
    match status {
        InstanceStatus::Running => text.green().to_string(),
        InstanceStatus::Starting | InstanceStatus::Stopping => text.yellow().to_string(),
        InstanceStatus::Stopped => text.dimmed().to_string(),
        InstanceStatus::Crashed => text.red().to_string(),
        InstanceStatus::Failed => text.red().bold().to_string(),
    }
}

fn format_restarts(snapshot: &InstanceSnapshot) -> String {
    if snapshot.ceiling_restarts > 0 {
        format!(
            "{} ({} mem)",
            snapshot.restarts, snapshot.ceiling_restarts
        )
    } else {
        snapshot.restarts.to_string()
    }
}

/// Human-readable byte size
pub fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Human-readable duration from seconds
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512 B");
        assert_eq!(format_memory(2048), "2.0 KB");
        assert_eq!(format_memory(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_memory(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3700), "1h 1m");
        assert_eq!(format_duration(90061), "1d 1h");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-ten", 11), "exactly-ten");
        let cut = truncate("a-very-long-application-name", 10);
        assert!(cut.chars().count() <= 10);
        assert!(cut.ends_with('…'));
    }
}
