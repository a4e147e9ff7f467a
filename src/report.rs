//! End-of-run summary: counts, failure details, and where things landed.

use crate::ledger::{DateLedger, LedgerStatus};
use crate::models::ArticleIdentity;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// One failed candidate, kept for the report's failure list.
#[derive(Debug, Clone)]
pub struct FailureNote {
    pub title: String,
    pub url: String,
    pub error: String,
    pub attempts: u32,
}

/// Accumulated outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub date: NaiveDate,
    pub feed_total: usize,
    pub skipped: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailureNote>,
    pub elapsed: Duration,
    pub date_dir: PathBuf,
}

impl RunReport {
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Harvest report for {}\n\n", self.date));
        out.push_str("| Metric | Count |\n");
        out.push_str("| --- | --- |\n");
        out.push_str(&format!("| Feed items | {} |\n", self.feed_total));
        out.push_str(&format!("| Already harvested | {} |\n", self.skipped));
        out.push_str(&format!("| Attempted | {} |\n", self.attempted));
        out.push_str(&format!("| Succeeded | {} |\n", self.succeeded));
        out.push_str(&format!("| Failed | {} |\n", self.failed));
        out.push('\n');

        if self.attempted == 0 {
            out.push_str("No fetches attempted.\n");
        } else {
            let rate = 100.0 * self.succeeded as f64 / self.attempted as f64;
            out.push_str(&format!(
                "Success rate: {rate:.1}% ({}/{})\n",
                self.succeeded, self.attempted
            ));
        }
        out.push_str(&format!("Elapsed: {:.1}s\n", self.elapsed.as_secs_f64()));

        if !self.failures.is_empty() {
            out.push_str("\n## Failures\n\n");
            for failure in &self.failures {
                out.push_str(&format!(
                    "- {} ({}): {} ({} attempt{})\n",
                    failure.title,
                    failure.url,
                    failure.error,
                    failure.attempts,
                    if failure.attempts == 1 { "" } else { "s" },
                ));
            }
        }

        out.push_str(&format!("\nDocuments: {}\n", self.date_dir.display()));
        out.push_str(&format!(
            "Ledger: {}\n",
            self.date_dir.join(crate::ledger::LEDGER_FILE).display()
        ));
        out
    }

    /// Write the rendered report to `<output_root>/report_<timestamp>.md`.
    pub async fn save(&self, output_root: &Path) -> Result<PathBuf, std::io::Error> {
        let name = format!("report_{}.md", Local::now().format("%Y%m%d_%H%M%S"));
        let path = output_root.join(name);
        fs::write(&path, self.render_markdown()).await?;
        info!(path = %path.display(), "Saved run report");
        Ok(path)
    }
}

/// Render the `--list-only` view: every candidate with a marker showing
/// whether it has already been harvested, without fetching anything.
pub fn render_listing(
    date: NaiveDate,
    candidates: &[ArticleIdentity],
    ledger: &DateLedger,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Candidates for {date}\n\n"));

    let mut done = 0;
    for candidate in candidates {
        let harvested = ledger
            .entry(&candidate.source_url)
            .is_some_and(|e| e.status == LedgerStatus::Success);
        if harvested {
            done += 1;
        }
        let marker = if harvested { "[done]" } else { "[new]" };
        out.push_str(&format!(
            "- {marker} {} ({})\n",
            candidate.title, candidate.source_url
        ));
    }

    out.push_str(&format!(
        "\n{} candidate{}, {done} already harvested.\n",
        candidates.len(),
        if candidates.len() == 1 { "" } else { "s" },
    ));
    out
}
