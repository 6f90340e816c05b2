//! Terminal output: a progress bar for bulk runs and colored status lines.
//!
//! Uses `indicatif` for progress and `console` for styling.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use lingotrack::bulk::{BulkReport, RecordOutcome, RecordResult};
use lingotrack::notify::NotificationResponse;
use lingotrack::state_machine::{DocumentRecord, Status};
use lingotrack::tracker::QueueReport;

/// Progress of a bulk operation, one tick per record.
pub struct BulkProgress {
    pb: ProgressBar,
    styles: Styles,
}

struct Styles {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl BulkProgress {
    pub fn start(operation: &str, total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style.progress_chars("=> "));
        pb.set_message(operation.to_string());
        Self {
            pb,
            styles: Styles::new(),
        }
    }

    pub fn record(&self, result: &RecordResult) {
        let line = match &result.outcome {
            RecordOutcome::Done { message } => {
                format!("  {} {}: {message}", self.styles.green.apply_to("✓"), result.key)
            }
            RecordOutcome::Skipped { reason } => {
                format!("  {} {}: {reason}", self.styles.dim.apply_to("-"), result.key)
            }
            RecordOutcome::Failed { kind, message } => format!(
                "  {} {}: {message} ({kind})",
                self.styles.red.apply_to("✗"),
                result.key
            ),
        };
        self.pb.println(line);
        self.pb.inc(1);
    }

    pub fn finish(&self, report: &BulkReport) {
        self.pb.finish_and_clear();
        let style = if report.failed() > 0 {
            &self.styles.yellow
        } else {
            &self.styles.green
        };
        println!(
            "{} {} done, {} skipped, {} failed",
            style.apply_to(report.summary()),
            report.done(),
            report.skipped(),
            report.failed()
        );
    }
}

fn status_style(status: Status) -> Style {
    match status {
        Status::Current => Style::new().green(),
        Status::Ready => Style::new().cyan(),
        Status::Pending | Status::Importing | Status::Request => Style::new().yellow(),
        Status::Error => Style::new().red().bold(),
        Status::Edited => Style::new().magenta(),
        Status::Untracked | Status::Cancelled | Status::Disabled => Style::new().dim(),
    }
}

pub fn print_records(records: &[DocumentRecord]) {
    if records.is_empty() {
        println!("No records.");
        return;
    }
    for record in records {
        println!(
            "{}  {}  profile={}  document={}",
            Style::new().bold().apply_to(&record.key),
            status_style(record.source_status).apply_to(record.source_status),
            record.profile,
            record.document_id.as_deref().unwrap_or("-"),
        );
        for (locale, status) in &record.target_statuses {
            println!("    {locale:<8} {}", status_style(*status).apply_to(status));
        }
        if let Some(error) = &record.last_error {
            println!("    {}", Style::new().red().apply_to(error));
        }
    }
}

pub fn print_notification(response: &NotificationResponse) {
    for message in &response.messages {
        println!("{message}");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&response.result).unwrap_or_default()
    );
}

pub fn print_queue_report(report: &QueueReport) {
    let style = if report.failed > 0 {
        Style::new().red().bold()
    } else {
        Style::new().green()
    };
    println!(
        "{} processed, {} downloaded, {} skipped, {} requeued, {} failed",
        style.apply_to(report.processed),
        report.downloaded,
        report.skipped,
        report.requeued,
        report.failed
    );
}
