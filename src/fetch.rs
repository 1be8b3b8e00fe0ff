use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::config::Config;
use crate::lever::{CandidateSource, LeverClient, Opportunity};
use crate::models::CandidateRecord;
use crate::snapshot;

// --- Merge logic ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    New,
    Updated,
    Preserved,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub new: usize,
    pub updated: usize,
    pub preserved: usize,
    /// Known from the previous snapshot but absent from this fetch.
    pub retained: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct MergedRecord {
    pub record: CandidateRecord,
    pub timestamp_changed: bool,
    pub requeued: bool,
}

/// Fold a freshly fetched record into what we already knew about it.
///
/// Upstream-owned fields take the fresh value; enrichment fields are left as
/// they were. A processed record goes back into the enrich queue only when the
/// upstream timestamp strictly increased.
pub fn merge_record(existing: &CandidateRecord, fresh: &CandidateRecord) -> MergedRecord {
    let mut merged = existing.clone();
    merged.name = fresh.name.clone();
    merged.email = fresh.email.clone();
    merged.location = fresh.location.clone();
    merged.headline = fresh.headline.clone();
    merged.stage = fresh.stage.clone();
    merged.origin = fresh.origin.clone();
    merged.updated_at = fresh.updated_at;
    merged.archived = fresh.archived;
    merged.applications = fresh.applications.clone();

    let timestamp_changed = existing.updated_at != fresh.updated_at;
    let requeued = existing.already_processed && fresh.updated_at > existing.updated_at;
    if requeued {
        merged.already_processed = false;
        merged.unprocessable = false;
        merged.enrich_failures = 0;
    }

    MergedRecord {
        record: merged,
        timestamp_changed,
        requeued,
    }
}

/// Merge a fetched batch into the previous snapshot.
///
/// Fetched records come first in fetch order, followed by previously known
/// records this fetch did not return. Nothing is ever dropped.
pub fn merge_snapshot(
    previous: Vec<CandidateRecord>,
    fresh: Vec<CandidateRecord>,
) -> (Vec<CandidateRecord>, Vec<MergeKind>, MergeStats) {
    let by_id: HashMap<String, usize> = previous
        .iter()
        .enumerate()
        .filter(|(_, r)| r.has_identifier())
        .map(|(i, r)| (r.candidate_id.clone(), i))
        .collect();

    let mut stats = MergeStats::default();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut merged = Vec::with_capacity(previous.len().max(fresh.len()));
    let mut kinds = Vec::with_capacity(fresh.len());

    for mut record in fresh {
        let known = by_id
            .get(&record.candidate_id)
            .copied()
            .filter(|idx| !seen.contains(idx));

        match known {
            Some(idx) => {
                seen.insert(idx);
                let outcome = merge_record(&previous[idx], &record);
                if outcome.requeued {
                    info!(name = %record.name, "updated upstream, queued for reprocessing");
                }
                if outcome.timestamp_changed {
                    stats.updated += 1;
                    kinds.push(MergeKind::Updated);
                } else {
                    stats.preserved += 1;
                    kinds.push(MergeKind::Preserved);
                }
                merged.push(outcome.record);
            }
            None => {
                record.already_processed = false;
                stats.new += 1;
                kinds.push(MergeKind::New);
                merged.push(record);
            }
        }
    }

    for (idx, record) in previous.into_iter().enumerate() {
        if !seen.contains(&idx) {
            stats.retained += 1;
            merged.push(record);
        }
    }

    stats.total = merged.len();
    (merged, kinds, stats)
}

// --- Fetching ---

pub fn record_from_opportunity(opp: &Opportunity, posting_id: &str, posting_title: &str) -> CandidateRecord {
    CandidateRecord {
        candidate_id: opp.id.clone(),
        name: opp.name.clone().unwrap_or_else(|| "Unknown".to_string()),
        email: opp.emails.first().cloned(),
        location: opp.location.clone().unwrap_or_default(),
        headline: opp.headline.clone().unwrap_or_default(),
        stage: opp.stage_text(),
        origin: opp.origin.clone().unwrap_or_default(),
        created_at: opp.created_at,
        updated_at: opp.updated_at,
        archived: opp.is_archived(),
        applications: opp.applications.clone(),
        posting_id: posting_id.to_string(),
        posting_title: posting_title.to_string(),
        already_processed: false,
        unprocessable: false,
        enrich_failures: 0,
        linkedin_url: String::new(),
        all_emails: Vec::new(),
        extra: Default::default(),
    }
}

/// Page through postings looking for a case-insensitive title match.
///
/// A failed page ends the search.
pub fn find_posting_by_title(source: &dyn CandidateSource, title: &str) -> Option<(String, String)> {
    let needle = title.to_lowercase();
    let mut cursor: Option<String> = None;

    loop {
        let page = match source.postings_page(cursor.as_deref()) {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "failed to list postings");
                return None;
            }
        };

        if let Some(posting) = page
            .data
            .iter()
            .find(|p| p.text.to_lowercase().contains(&needle))
        {
            return Some((posting.id.clone(), posting.text.clone()));
        }

        match page.next_cursor() {
            Some(next) => cursor = Some(next.to_string()),
            None => return None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub opportunities: Vec<Opportunity>,
    pub pages: usize,
    /// A page request failed and the remaining pages were not fetched.
    pub truncated: bool,
}

pub fn fetch_opportunities(source: &dyn CandidateSource, posting_id: &str) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    let mut cursor: Option<String> = None;

    loop {
        let page = match source.opportunities_page(posting_id, cursor.as_deref()) {
            Ok(page) => page,
            Err(e) => {
                warn!(page = outcome.pages + 1, error = %format!("{:#}", e), "page request failed, keeping partial results");
                outcome.truncated = true;
                break;
            }
        };
        outcome.pages += 1;

        if page.data.is_empty() {
            break;
        }
        println!("Page {}: {} candidates", outcome.pages, page.data.len());
        let next = page.next_cursor().map(str::to_string);
        outcome.opportunities.extend(page.data);

        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    outcome
}

// --- Stage entry point ---

pub fn run(config: &Config) -> Result<()> {
    let client = LeverClient::new(config)?;
    run_with(config, &client)
}

pub fn run_with(config: &Config, source: &dyn CandidateSource) -> Result<()> {
    let previous: Vec<CandidateRecord> = snapshot::load_or_empty(&config.candidates_file);
    println!("Loaded {} existing candidates", previous.len());

    source
        .check_connection()
        .context("Failed to connect to Lever API. Check the API key and its permissions")?;

    println!("Searching for posting '{}'...", config.posting_title);
    let Some((posting_id, posting_text)) = find_posting_by_title(source, &config.posting_title) else {
        println!("Posting '{}' not found - snapshot left unchanged", config.posting_title);
        return Ok(());
    };
    println!("Found posting '{}' ({})", posting_text, posting_id);

    let outcome = fetch_opportunities(source, &posting_id);
    if outcome.truncated {
        println!("Fetch stopped early after {} page(s); saving partial results", outcome.pages);
    }

    let fresh: Vec<CandidateRecord> = outcome
        .opportunities
        .iter()
        .filter(|opp| {
            if opp.id.trim().is_empty() {
                warn!(name = ?opp.name, "skipping opportunity without id");
                false
            } else {
                true
            }
        })
        .map(|opp| record_from_opportunity(opp, &posting_id, &config.posting_title))
        .collect();

    if fresh.is_empty() {
        println!("No candidates found for this posting - snapshot left unchanged");
        return Ok(());
    }
    println!("Fetched {} candidates", fresh.len());

    let (merged, kinds, stats) = merge_snapshot(previous, fresh);
    snapshot::save(&config.candidates_file, &merged)?;
    info!(path = %config.candidates_file.display(), total = stats.total, "snapshot saved");

    println!("\nMerge summary:");
    println!("  New:       {}", stats.new);
    println!("  Updated:   {}", stats.updated);
    println!("  Unchanged: {}", stats.preserved);
    if stats.retained > 0 {
        println!("  Retained:  {} (not returned this run)", stats.retained);
    }
    println!("  Total:     {}", stats.total);
    println!("Saved to {}", config.candidates_file.display());

    print_preview(&merged, &kinds, stats.new + stats.updated);
    Ok(())
}

fn print_preview(merged: &[CandidateRecord], kinds: &[MergeKind], changed: usize) {
    if changed == 0 {
        println!("\nAll {} candidates are up to date", merged.len());
        return;
    }

    println!("\nNew/updated candidates:");
    let preview = merged
        .iter()
        .zip(kinds)
        .filter(|(_, kind)| **kind != MergeKind::Preserved)
        .take(3);
    for (i, (record, kind)) in preview.enumerate() {
        let label = if *kind == MergeKind::New { "NEW" } else { "UPDATED" };
        let processing = if record.already_processed { "processed" } else { "pending" };
        println!("{}. {} ({})", i + 1, record.name, label);
        println!("   Email:    {}", record.email.as_deref().unwrap_or("-"));
        println!("   Location: {}", or_dash(&record.location));
        println!("   Headline: {}", or_dash(&record.headline));
        println!("   Stage:    {}", or_dash(&record.stage));
        println!("   Status:   {}", processing);
    }
    if changed > 3 {
        println!("... and {} more", changed - 3);
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}
