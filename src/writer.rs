//! Writes harvested documents to the date directory and keeps the ledgers
//! in step.
//!
//! Ordering invariant: the document file is written before the ledger entry
//! that names it. A crash between the two leaves an orphan document, never a
//! ledger entry pointing at a missing file. Orphans are detected on the next
//! run by their front-matter `source_url` and overwritten in place, so a
//! recovered run produces exactly one document per article.

use crate::ledger::{AggregateLedger, DateLedger, LedgerError};
use crate::models::{NormalizedDocument, StoredDocument};
use crate::utils::sanitize_title;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Errors writing documents or their ledger records.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to access {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Owns the date directory for one run: document files, the per-date
/// ledger, and the aggregate ledger at the output root.
///
/// There is exactly one writer per run, fed serially from the fetch stream,
/// so sequence allocation and ledger persistence never race.
pub struct DocumentWriter {
    output_root: PathBuf,
    date_dir: PathBuf,
    date_ledger: DateLedger,
    aggregate: AggregateLedger,
    next_seq: u32,
}

impl DocumentWriter {
    /// Open (creating if needed) the date directory under `output_root` and
    /// load both ledgers. Sequence numbering resumes above the highest
    /// `NNN_` prefix already present, orphans included.
    #[instrument(level = "info", skip_all, fields(date = %date))]
    pub async fn open(output_root: &Path, date: NaiveDate) -> Result<Self, WriteError> {
        let date_dir = output_root.join(date.to_string());
        fs::create_dir_all(&date_dir).await.map_err(|source| WriteError::Io {
            path: date_dir.display().to_string(),
            source,
        })?;

        let date_ledger = DateLedger::load_or_new(&date_dir, date).await?;
        let aggregate = AggregateLedger::load_or_new(output_root).await?;
        let next_seq = 1 + max_sequence(&date_dir).await?;
        info!(
            dir = %date_dir.display(),
            known = date_ledger.entries.len(),
            next_seq,
            "Opened date directory"
        );

        Ok(Self {
            output_root: output_root.to_path_buf(),
            date_dir,
            date_ledger,
            aggregate,
            next_seq,
        })
    }

    /// The per-date ledger as loaded, for pre-fetch dedup decisions.
    pub fn ledger(&self) -> &DateLedger {
        &self.date_ledger
    }

    pub fn date_dir(&self) -> &Path {
        &self.date_dir
    }

    /// Store one document, then record it in both ledgers.
    ///
    /// A fresh document gets the next sequence number; an orphan left by an
    /// interrupted run is overwritten at its existing path.
    #[instrument(level = "info", skip_all, fields(url = %doc.identity.source_url))]
    pub async fn commit(&mut self, doc: &NormalizedDocument) -> Result<StoredDocument, WriteError> {
        let url = doc.identity.source_url.as_str();
        let (path, seq) = match self.find_orphan(url).await? {
            Some((path, seq)) => {
                warn!(path = %path.display(), "Overwriting orphan document from interrupted run");
                (path, seq)
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                let name = format!("{:03}_{}.md", seq, sanitize_title(&doc.title));
                (self.date_dir.join(name), seq)
            }
        };

        let fetched_at = now_stamp();
        fs::write(&path, render_markdown(doc, &fetched_at))
            .await
            .map_err(|source| WriteError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.date_ledger.record_success(url, &name, fetched_at);
        self.date_ledger.persist(&self.date_dir).await?;
        if let Some(entry) = self.date_ledger.entry(url) {
            self.aggregate.upsert(url, entry.clone());
        }
        self.aggregate.persist(&self.output_root).await?;

        info!(path = %path.display(), seq, "Stored document");
        Ok(StoredDocument {
            path,
            sequence_index: seq,
        })
    }

    /// Record a terminal failure in both ledgers. No document is written.
    #[instrument(level = "info", skip_all, fields(url = %url))]
    pub async fn record_failure(&mut self, url: &str, error: &str) -> Result<(), WriteError> {
        self.date_ledger.record_failure(url, error, now_stamp());
        self.date_ledger.persist(&self.date_dir).await?;
        if let Some(entry) = self.date_ledger.entry(url) {
            self.aggregate.upsert(url, entry.clone());
        }
        self.aggregate.persist(&self.output_root).await?;
        warn!(error, "Recorded failure");
        Ok(())
    }

    /// Look for a document file that no ledger entry claims and whose front
    /// matter names `url`. Matching by URL rather than filename survives a
    /// title change between runs.
    async fn find_orphan(&self, url: &str) -> Result<Option<(PathBuf, u32)>, WriteError> {
        let mut dir = fs::read_dir(&self.date_dir)
            .await
            .map_err(|source| WriteError::Io {
                path: self.date_dir.display().to_string(),
                source,
            })?;
        while let Some(entry) = dir.next_entry().await.map_err(|source| WriteError::Io {
            path: self.date_dir.display().to_string(),
            source,
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(seq) = parse_sequence(&name) else {
                continue;
            };
            let claimed = self
                .date_ledger
                .entries
                .values()
                .any(|e| e.file.as_deref() == Some(name.as_str()));
            if claimed {
                continue;
            }
            let path = entry.path();
            let Ok(contents) = fs::read_to_string(&path).await else {
                continue;
            };
            if front_matter_source_url(&contents) == Some(url) {
                return Ok(Some((path, seq)));
            }
        }
        Ok(None)
    }
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Highest `NNN_` document prefix in `date_dir`, or 0 if none.
async fn max_sequence(date_dir: &Path) -> Result<u32, WriteError> {
    let mut max = 0;
    let mut dir = fs::read_dir(date_dir)
        .await
        .map_err(|source| WriteError::Io {
            path: date_dir.display().to_string(),
            source,
        })?;
    while let Some(entry) = dir.next_entry().await.map_err(|source| WriteError::Io {
        path: date_dir.display().to_string(),
        source,
    })? {
        if let Some(seq) = parse_sequence(&entry.file_name().to_string_lossy()) {
            max = max.max(seq);
        }
    }
    Ok(max)
}

/// Parse the sequence out of a `NNN_title.md` filename.
fn parse_sequence(name: &str) -> Option<u32> {
    if !name.ends_with(".md") {
        return None;
    }
    let (digits, rest) = name.split_at_checked(3)?;
    if !rest.starts_with('_') {
        return None;
    }
    digits.parse().ok()
}

fn front_matter_source_url(contents: &str) -> Option<&str> {
    let mut lines = contents.lines();
    if lines.next()? != "---" {
        return None;
    }
    for line in lines {
        if line == "---" {
            break;
        }
        if let Some(rest) = line.strip_prefix("source_url: ") {
            return Some(rest.trim());
        }
    }
    None
}

fn render_markdown(doc: &NormalizedDocument, fetched_at: &str) -> String {
    let title = single_line(&doc.title);
    let author = single_line(&doc.author);
    let published = doc
        .published_hint
        .clone()
        .unwrap_or_else(|| doc.identity.published_at.to_rfc3339());
    format!(
        "---\n\
         title: {title}\n\
         author: {author}\n\
         published_at: {published}\n\
         source_url: {url}\n\
         fetched_at: {fetched_at}\n\
         ---\n\
         \n\
         # {title}\n\
         \n\
         {body}\n",
        url = doc.identity.source_url,
        body = doc.body,
    )
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
