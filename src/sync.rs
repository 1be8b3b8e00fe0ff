use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::{build_row, format_join_date, ColumnMapping, ExistingEntries, Verdict};
use crate::models::FilteredCandidate;
use crate::sheets::{GoogleSheets, Spreadsheet};
use crate::snapshot;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not determine sheet column structure from headers {0:?}")]
    UnknownLayout(Vec<String>),

    #[error("failed to read sheet: {0:#}")]
    Read(anyhow::Error),

    #[error("failed to append rows: {0:#}")]
    Append(anyhow::Error),
}

#[derive(Debug)]
pub struct SyncPlan {
    pub mapping: ColumnMapping,
    pub rows: Vec<Vec<String>>,
    pub verdicts: Vec<Verdict>,
}

impl SyncPlan {
    pub fn added(&self) -> usize {
        self.rows.len()
    }

    pub fn duplicates(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|v| matches!(v, Verdict::Duplicate(_)))
            .count()
    }

    pub fn without_email(&self) -> usize {
        self.verdicts.iter().filter(|v| **v == Verdict::NoEmail).count()
    }
}

/// Decide which candidates become new rows, given every row currently in the sheet.
pub fn plan_sync(
    candidates: &[FilteredCandidate],
    sheet_rows: &[Vec<String>],
    today: NaiveDate,
) -> Result<SyncPlan, SyncError> {
    let headers = sheet_rows.first().cloned().unwrap_or_default();
    let mapping = ColumnMapping::discover(&headers);
    if mapping.is_empty() {
        return Err(SyncError::UnknownLayout(headers));
    }

    let width = headers.len();
    let join_date = format_join_date(today);
    let mut existing = ExistingEntries::scan(sheet_rows, &mapping);
    info!(
        emails = existing.emails.len(),
        names = existing.names.len(),
        usernames = existing.linkedin_usernames.len(),
        "scanned existing sheet rows"
    );

    let mut rows = Vec::new();
    let mut verdicts = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let verdict = existing.classify(candidate);
        match &verdict {
            Verdict::New => {
                println!("  new: {} ({} email(s))", candidate.name, candidate.all_emails.len());
                existing.remember(candidate);
                rows.push(build_row(candidate, &mapping, width, &join_date));
            }
            Verdict::Duplicate(reason) => println!("  duplicate: {} - {}", candidate.name, reason),
            Verdict::NoEmail => println!("  skipped: {} - no email addresses", candidate.name),
        }
        verdicts.push(verdict);
    }

    Ok(SyncPlan {
        mapping,
        rows,
        verdicts,
    })
}

/// Read the sheet, plan, and append all new rows in a single call.
///
/// Returns the number of rows added.
pub fn sync_candidates(
    sheet: &dyn Spreadsheet,
    candidates: &[FilteredCandidate],
    today: NaiveDate,
) -> Result<usize, SyncError> {
    if candidates.is_empty() {
        println!("No candidates to process");
        return Ok(0);
    }

    let sheet_rows = sheet.read_all().map_err(SyncError::Read)?;
    let plan = plan_sync(candidates, &sheet_rows, today)?;

    for (field, idx) in plan.mapping.iter() {
        info!(%field, column = idx, "column mapped");
    }

    if plan.rows.is_empty() {
        println!("No new candidates to add ({} duplicates, {} without email)", plan.duplicates(), plan.without_email());
        return Ok(0);
    }

    sheet.append_rows(&plan.rows).map_err(SyncError::Append)?;
    Ok(plan.added())
}

// --- Stage entry point ---

pub fn run(config: &Config) -> Result<()> {
    let spreadsheet_id = config.require_spreadsheet_id()?;
    let credentials_file = config.require_credentials_file()?;

    let candidates: Vec<FilteredCandidate> = snapshot::load_required(&config.filtered_file)
        .context("Run the enrich stage first")?;
    println!("Loaded {} candidates from {}", candidates.len(), config.filtered_file.display());

    let sheet = GoogleSheets::connect(credentials_file, spreadsheet_id)?;
    println!("Opened spreadsheet '{}' (worksheet '{}')", sheet.spreadsheet_title, sheet.worksheet_title);

    let today = Local::now().date_naive();
    let added = match sync_candidates(&sheet, &candidates, today) {
        Ok(added) => added,
        Err(SyncError::UnknownLayout(headers)) => {
            warn!(?headers, "no recognizable columns, nothing appended");
            println!("Could not determine sheet column structure - nothing added");
            0
        }
        Err(e) => return Err(e.into()),
    };

    println!("\nSync summary:");
    println!("  Candidates processed: {}", candidates.len());
    println!("  New rows added:       {}", added);
    println!("  Skipped:              {}", candidates.len() - added);
    println!("  Join date:            {}", format_join_date(today));
    println!("  Sheet:                https://docs.google.com/spreadsheets/d/{}", spreadsheet_id);
    Ok(())
}
