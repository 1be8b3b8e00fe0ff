use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::lever::{CandidateSource, LeverClient, ProfileLink};
use crate::models::{CandidateRecord, FilteredCandidate};
use crate::snapshot;

static PROFILE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(www\.)?linkedin\.com/(in|pub)/").expect("profile url pattern is valid")
});

/// First link that points at a LinkedIn profile (`/in/` or `/pub/`).
pub fn extract_profile_url(links: &[ProfileLink]) -> Option<String> {
    links
        .iter()
        .filter_map(ProfileLink::url)
        .find(|url| PROFILE_URL.is_match(url))
        .map(str::to_string)
}

/// Every processed record, in snapshot order.
pub fn filtered_projection(records: &[CandidateRecord]) -> Vec<FilteredCandidate> {
    records
        .iter()
        .filter(|r| r.already_processed)
        .map(CandidateRecord::to_filtered)
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichStats {
    pub pending: usize,
    pub already_processed: usize,
    pub successful_fetches: usize,
    pub failed_fetches: usize,
    pub linkedin_found: usize,
    pub unprocessable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Enriched,
    FetchFailed,
    GaveUp,
    NoIdentifier,
}

pub struct Enricher<'a> {
    source: &'a dyn CandidateSource,
    max_attempts: Option<u32>,
    stats: EnrichStats,
}

impl<'a> Enricher<'a> {
    pub fn new(source: &'a dyn CandidateSource, max_attempts: Option<u32>) -> Self {
        Self {
            source,
            max_attempts,
            stats: EnrichStats::default(),
        }
    }

    pub fn stats(&self) -> &EnrichStats {
        &self.stats
    }

    /// Enrich every unprocessed record, calling `persist` with the full
    /// snapshot after each one.
    pub fn process<F>(&mut self, records: &mut [CandidateRecord], mut persist: F)
    where
        F: FnMut(&[CandidateRecord]) -> Result<()>,
    {
        let pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.already_processed)
            .map(|(i, _)| i)
            .collect();
        self.stats.pending = pending.len();
        self.stats.already_processed = records.len() - pending.len();

        println!("Already processed: {}", self.stats.already_processed);
        println!("Pending:           {}", self.stats.pending);

        for (n, &idx) in pending.iter().enumerate() {
            println!("[{}/{}] {}", n + 1, pending.len(), records[idx].name);
            let outcome = self.enrich_one(&mut records[idx]);
            debug!(candidate = %records[idx].candidate_id, ?outcome, "enrich outcome");

            if let Err(e) = persist(&*records) {
                warn!(error = %format!("{:#}", e), "failed to save snapshot");
            }

            if (n + 1) % 10 == 0 || n + 1 == pending.len() {
                println!(
                    "  progress {}/{}: {} fetched, {} failed, {} LinkedIn URLs",
                    n + 1,
                    pending.len(),
                    self.stats.successful_fetches,
                    self.stats.failed_fetches,
                    self.stats.linkedin_found
                );
            }
        }
    }

    fn enrich_one(&mut self, record: &mut CandidateRecord) -> Outcome {
        if !record.has_identifier() {
            // Nothing to look up. Park it for good, but keep it distinguishable
            // from a record that was actually enriched.
            println!("  no candidate id, marking unprocessable");
            record.already_processed = true;
            record.unprocessable = true;
            self.stats.unprocessable += 1;
            return Outcome::NoIdentifier;
        }

        match self.source.candidate_detail(&record.candidate_id) {
            Ok(detail) => {
                self.stats.successful_fetches += 1;
                match extract_profile_url(&detail.links) {
                    Some(url) => {
                        println!("  LinkedIn: {}", url);
                        self.stats.linkedin_found += 1;
                        record.linkedin_url = url;
                    }
                    None => {
                        println!("  no LinkedIn URL");
                        record.linkedin_url = String::new();
                    }
                }
                println!("  {} email(s)", detail.emails.len());
                record.all_emails = detail.emails;
                record.already_processed = true;
                record.unprocessable = false;
                record.enrich_failures = 0;
                Outcome::Enriched
            }
            Err(e) => {
                self.stats.failed_fetches += 1;
                record.enrich_failures += 1;
                warn!(candidate = %record.candidate_id, attempts = record.enrich_failures, error = %format!("{:#}", e), "profile fetch failed");

                if self.max_attempts.is_some_and(|max| record.enrich_failures >= max) {
                    println!("  giving up after {} failed attempts", record.enrich_failures);
                    record.already_processed = true;
                    record.unprocessable = true;
                    self.stats.unprocessable += 1;
                    Outcome::GaveUp
                } else {
                    println!("  profile fetch failed, will retry next run");
                    Outcome::FetchFailed
                }
            }
        }
    }
}

// --- Stage entry point ---

pub fn run(config: &Config) -> Result<()> {
    let client = LeverClient::new(config)?;
    run_with(config, &client)
}

pub fn run_with(config: &Config, source: &dyn CandidateSource) -> Result<()> {
    let mut records: Vec<CandidateRecord> = snapshot::load_required(&config.candidates_file)?;
    println!("Loaded {} candidates from {}", records.len(), config.candidates_file.display());

    let mut enricher = Enricher::new(source, config.enrich_max_attempts);
    enricher.process(&mut records, |all| snapshot::save(&config.candidates_file, all));

    let filtered = filtered_projection(&records);
    snapshot::save(&config.filtered_file, &filtered)?;
    println!("\nSaved {} filtered candidates to {}", filtered.len(), config.filtered_file.display());

    let stats = enricher.stats();
    let attempted = stats.successful_fetches + stats.failed_fetches;
    println!("\nEnrichment summary:");
    println!("  Profiles requested:   {}", attempted);
    println!("  Successful fetches:   {}", stats.successful_fetches);
    println!("  Failed fetches:       {}", stats.failed_fetches);
    println!("  Unprocessable:        {}", stats.unprocessable);
    println!("  LinkedIn URLs found:  {}", stats.linkedin_found);
    if attempted > 0 {
        println!(
            "  LinkedIn hit rate:    {:.1}%",
            stats.linkedin_found as f64 / attempted as f64 * 100.0
        );
    }

    for (i, candidate) in filtered.iter().take(3).enumerate() {
        println!("\n{}. {}", i + 1, candidate.name);
        if candidate.all_emails.is_empty() {
            println!("   Emails:   none");
        } else {
            println!("   Emails:   {}", candidate.all_emails.join(", "));
        }
        println!("   Location: {}", if candidate.location.is_empty() { "-" } else { &candidate.location });
        println!("   LinkedIn: {}", if candidate.linkedin_url.is_empty() { "-" } else { &candidate.linkedin_url });
    }
    if filtered.len() > 3 {
        println!("\n... and {} more", filtered.len() - 3);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lever::{CandidateDetail, Opportunity, Page, Posting};
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn links(raw: serde_json::Value) -> Vec<ProfileLink> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_extract_profile_url_variants() {
        let found = extract_profile_url(&links(serde_json::json!([
            "https://github.com/ada",
            {"url": "https://WWW.LinkedIn.com/in/Ada-L/"},
            "https://linkedin.com/in/second"
        ])));
        assert_eq!(found.as_deref(), Some("https://WWW.LinkedIn.com/in/Ada-L/"));

        let found = extract_profile_url(&links(serde_json::json!(["http://linkedin.com/pub/old-style/1/2/3"])));
        assert_eq!(found.as_deref(), Some("http://linkedin.com/pub/old-style/1/2/3"));
    }

    #[test]
    fn test_extract_profile_url_ignores_non_profile_links() {
        let found = extract_profile_url(&links(serde_json::json!([
            "https://www.linkedin.com/company/acme",
            {"label": "no url"},
            7
        ])));
        assert_eq!(found, None);
        assert_eq!(extract_profile_url(&[]), None);
    }

    #[derive(Default)]
    struct FakeSource {
        details: HashMap<String, Result<CandidateDetail, String>>,
        calls: RefCell<Vec<String>>,
    }

    impl CandidateSource for FakeSource {
        fn check_connection(&self) -> Result<()> {
            Ok(())
        }

        fn postings_page(&self, _cursor: Option<&str>) -> Result<Page<Posting>> {
            unimplemented!()
        }

        fn opportunities_page(&self, _posting_id: &str, _cursor: Option<&str>) -> Result<Page<Opportunity>> {
            unimplemented!()
        }

        fn candidate_detail(&self, candidate_id: &str) -> Result<CandidateDetail> {
            self.calls.borrow_mut().push(candidate_id.to_string());
            match self.details.get(candidate_id) {
                Some(Ok(detail)) => Ok(detail.clone()),
                Some(Err(msg)) => Err(anyhow!(msg.clone())),
                None => Err(anyhow!("404 not found")),
            }
        }
    }

    fn detail(links_json: serde_json::Value, emails: &[&str]) -> CandidateDetail {
        CandidateDetail {
            links: links(links_json),
            emails: emails.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn pending(id: &str) -> CandidateRecord {
        serde_json::from_value(serde_json::json!({
            "candidate_id": id,
            "name": format!("Name {}", id),
            "email": format!("{}@x.com", id),
            "already_processed": false
        }))
        .unwrap()
    }

    #[test]
    fn test_process_enriches_and_persists_after_each_record() {
        let mut source = FakeSource::default();
        source.details.insert(
            "a".to_string(),
            Ok(detail(serde_json::json!(["https://linkedin.com/in/a"]), &["a@x.com", "a@y.com"])),
        );
        source.details.insert("b".to_string(), Ok(detail(serde_json::json!([]), &["b@x.com"])));

        let mut done = pending("done");
        done.already_processed = true;
        let mut records = vec![pending("a"), done, pending("b")];

        let mut saves: Vec<Vec<bool>> = Vec::new();
        let mut enricher = Enricher::new(&source, None);
        enricher.process(&mut records, |all| {
            saves.push(all.iter().map(|r| r.already_processed).collect());
            Ok(())
        });

        assert_eq!(*source.calls.borrow(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(saves, vec![vec![true, true, false], vec![true, true, true]]);

        assert_eq!(records[0].linkedin_url, "https://linkedin.com/in/a");
        assert_eq!(records[0].all_emails, vec!["a@x.com".to_string(), "a@y.com".to_string()]);
        assert_eq!(records[2].linkedin_url, "");
        assert_eq!(records[2].all_emails, vec!["b@x.com".to_string()]);

        let stats = enricher.stats();
        assert_eq!(stats.successful_fetches, 2);
        assert_eq!(stats.linkedin_found, 1);
        assert_eq!(stats.already_processed, 1);
    }

    #[test]
    fn test_fetch_failure_leaves_record_pending() {
        let mut source = FakeSource::default();
        source.details.insert("a".to_string(), Err("HTTP 503".to_string()));
        let mut records = vec![pending("a")];

        let mut enricher = Enricher::new(&source, None);
        enricher.process(&mut records, |_| Ok(()));

        assert!(!records[0].already_processed);
        assert!(!records[0].unprocessable);
        assert_eq!(records[0].enrich_failures, 1);
        assert_eq!(enricher.stats().failed_fetches, 1);
        // Exactly one attempt per run.
        assert_eq!(source.calls.borrow().len(), 1);
    }

    #[test]
    fn test_retry_cap_marks_record_unprocessable() {
        let source = FakeSource::default();
        let mut record = pending("a");
        record.enrich_failures = 2;
        let mut records = vec![record];

        let mut enricher = Enricher::new(&source, Some(3));
        enricher.process(&mut records, |_| Ok(()));

        assert!(records[0].already_processed);
        assert!(records[0].unprocessable);
        assert_eq!(records[0].enrich_failures, 3);
    }

    #[test]
    fn test_missing_identifier_is_unprocessable_without_fetch() {
        let source = FakeSource::default();
        let mut records = vec![pending("")];

        let mut enricher = Enricher::new(&source, None);
        enricher.process(&mut records, |_| Ok(()));

        assert!(records[0].already_processed);
        assert!(records[0].unprocessable);
        assert!(records[0].all_emails.is_empty());
        assert!(source.calls.borrow().is_empty());
        assert_eq!(enricher.stats().unprocessable, 1);
    }

    #[test]
    fn test_persist_failure_does_not_stop_processing() {
        let mut source = FakeSource::default();
        source.details.insert("a".to_string(), Ok(detail(serde_json::json!([]), &["a@x.com"])));
        source.details.insert("b".to_string(), Ok(detail(serde_json::json!([]), &["b@x.com"])));
        let mut records = vec![pending("a"), pending("b")];

        let mut enricher = Enricher::new(&source, None);
        enricher.process(&mut records, |_| Err(anyhow!("disk full")));
        assert!(records.iter().all(|r| r.already_processed));
    }

    #[test]
    fn test_filtered_projection_only_includes_processed() {
        let mut a = pending("a");
        a.already_processed = true;
        a.all_emails = vec!["a@x.com".to_string()];
        let records = vec![a, pending("b")];

        let filtered = filtered_projection(&records);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Name a");
        assert_eq!(filtered[0].all_emails, vec!["a@x.com".to_string()]);
    }

    #[test]
    fn test_run_with_writes_both_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.candidates_file = dir.path().join("candidates.json");
        config.filtered_file = dir.path().join("filtered.json");
        snapshot::save(&config.candidates_file, &[pending("a"), pending("b")]).unwrap();

        let mut source = FakeSource::default();
        source.details.insert(
            "a".to_string(),
            Ok(detail(serde_json::json!([{"url": "https://www.linkedin.com/in/a"}]), &["a@x.com"])),
        );
        run_with(&config, &source).unwrap();

        let raw: Vec<CandidateRecord> = snapshot::load_required(&config.candidates_file).unwrap();
        assert!(raw[0].already_processed);
        assert!(!raw[1].already_processed);
        assert_eq!(raw[1].enrich_failures, 1);

        let filtered: Vec<FilteredCandidate> = snapshot::load_required(&config.filtered_file).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].linkedin_url, "https://www.linkedin.com/in/a");
    }

    #[test]
    fn test_run_with_requires_raw_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.candidates_file = dir.path().join("missing.json");
        config.filtered_file = dir.path().join("filtered.json");

        let source = FakeSource::default();
        assert!(run_with(&config, &source).is_err());
        assert!(!config.filtered_file.exists());
    }
}
