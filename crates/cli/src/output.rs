//! Output formatting for CLI

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use launchgate_common::{
    AttemptOutcome, AttemptResult, AttemptRisk, Schedule, ScheduleStatus, Severity, Verdict,
};
use launchgate_engine::Pattern;
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

impl OutputFormat {
    /// JSON and YAML print whole records instead of summaries
    pub fn is_structured(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Yaml)
    }
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a whole record in a structured format
pub fn print_value<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value).unwrap_or_default()),
        _ => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(T::headers());
            table.add_row(item.row());
            println!("{table}");
        }
        OutputFormat::Json | OutputFormat::Yaml => print_value(item, format),
        OutputFormat::Plain => print_fields(item),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if format.is_structured() {
        print_value(items, format);
        return;
    }
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                print_fields(item);
            }
        }
        _ => {
            let mut table = new_table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_fields<T: TableDisplay>(item: &T) {
    for (header, value) in T::headers().iter().zip(item.row()) {
        println!("{}: {}", header, value);
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

pub fn verdict_label(verdict: Verdict) -> ColoredString {
    let text = verdict.to_string();
    match verdict {
        Verdict::Ready => text.green().bold(),
        Verdict::Friction => text.yellow().bold(),
        Verdict::DoNotLaunch => text.red().bold(),
    }
}

// ============================================================================
// Table rows
// ============================================================================

impl TableDisplay for AttemptResult {
    fn headers() -> Vec<&'static str> {
        vec!["ATTEMPT", "OUTCOME", "CRITICAL", "DURATION", "DETAIL"]
    }

    fn row(&self) -> Vec<String> {
        let detail = match self.outcome {
            AttemptOutcome::Skipped => self.skip_reason.clone().unwrap_or_default(),
            AttemptOutcome::Friction => format!("{} friction signal(s)", self.friction_signals.len()),
            _ => self.error.clone().unwrap_or_default(),
        };
        vec![
            self.attempt_id.clone(),
            self.outcome.to_string(),
            if self.critical { "yes" } else { "no" }.to_string(),
            format!("{}ms", self.duration_ms),
            detail,
        ]
    }
}

impl TableDisplay for AttemptRisk {
    fn headers() -> Vec<&'static str> {
        vec!["ATTEMPT", "CATEGORY", "OUTCOME", "FREQUENCY", "SCORE", "SEVERITY"]
    }

    fn row(&self) -> Vec<String> {
        let severity = match self.severity {
            Severity::Critical => self.severity.to_string().red().to_string(),
            Severity::Warning => self.severity.to_string().yellow().to_string(),
            Severity::Info => self.severity.to_string(),
        };
        vec![
            self.attempt_id.clone(),
            self.category.to_string(),
            self.outcome.to_string(),
            self.frequency.to_string(),
            self.score.to_string(),
            severity,
        ]
    }
}

impl TableDisplay for Pattern {
    fn headers() -> Vec<&'static str> {
        vec!["TYPE", "SUBJECT", "CONFIDENCE", "SUMMARY"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.pattern_type.to_string(),
            self.subject.clone(),
            format!("{:?}", self.confidence).to_lowercase(),
            self.summary.clone(),
        ]
    }
}

impl TableDisplay for Schedule {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "URL", "PRESET", "EVERY", "STATUS", "NEXT RUN", "FAILURES", "LAST EXIT"]
    }

    fn row(&self) -> Vec<String> {
        let status = match (&self.status, &self.quarantine_reason) {
            (_, Some(reason)) => format!("quarantined ({})", reason),
            (ScheduleStatus::Running, None) => "running".to_string(),
            (ScheduleStatus::Stopped, None) => "stopped".to_string(),
        };
        vec![
            self.id.clone(),
            self.url.clone(),
            self.preset.clone().unwrap_or_else(|| "-".to_string()),
            format!("{}m", self.interval_minutes),
            status,
            self.next_run_at.clone().unwrap_or_else(|| "now".to_string()),
            self.consecutive_failures.to_string(),
            self.last_exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_attempt_row_shows_reason() {
        let result = AttemptResult::skipped("pricing", false, "skipped by policy");
        let row = result.row();
        assert_eq!(row.len(), AttemptResult::headers().len());
        assert_eq!(row[1], "SKIPPED");
        assert_eq!(row[4], "skipped by policy");
    }

    #[test]
    fn test_quarantined_schedule_row() {
        let mut schedule = Schedule::new("https://app.test", Some("saas".to_string()), 15);
        schedule.quarantine_reason = Some("interval must be positive".to_string());
        let row = schedule.row();
        assert_eq!(row[2], "saas");
        assert_eq!(row[3], "15m");
        assert!(row[4].starts_with("quarantined"));
    }
}
