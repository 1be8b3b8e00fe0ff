//! Duplicate detection against the destination sheet and row layout.
//!
//! Every sync reads the whole sheet and rebuilds these sets from scratch, so
//! cost grows with the number of existing rows. That is fine at the sizes this
//! sheet reaches; a very large sheet would want a persisted index instead.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use crate::models::FilteredCandidate;

/// Secondary email columns (F, G), filled after the mapped primary column.
pub const SECONDARY_EMAIL_COLUMNS: [usize; 2] = [5, 6];

/// Columns that may hold an email on existing rows (F, G, H). Nothing is
/// written to H, but older rows keep addresses there.
pub const LEGACY_EMAIL_COLUMNS: [usize; 3] = [5, 6, 7];

static LINKEDIN_USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)linkedin\.com/in/([^/?]+)").expect("username pattern is valid")
});

static TRAILING_JUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_].*$").expect("trailing pattern is valid"));

/// Pull the profile handle out of a LinkedIn `/in/` URL, lowercased.
pub fn extract_linkedin_username(url: &str) -> Option<String> {
    let caps = LINKEDIN_USERNAME.captures(url)?;
    let raw = caps.get(1)?.as_str().trim();
    let username = TRAILING_JUNK.replace(raw, "");
    if username.is_empty() {
        None
    } else {
        Some(username.to_lowercase())
    }
}

/// First token is the first name; everything after it is the last name.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `M/D/YY`, e.g. `6/1/25`.
pub fn format_join_date(date: NaiveDate) -> String {
    format!("{}/{}/{:02}", date.month(), date.day(), date.year() % 100)
}

// --- Column mapping ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    FirstName,
    LastName,
    Email,
    Location,
    LinkedinUrl,
    JoinDate,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::Location,
        Field::LinkedinUrl,
        Field::JoinDate,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::FirstName => "first_name",
            Field::LastName => "last_name",
            Field::Email => "email",
            Field::Location => "location",
            Field::LinkedinUrl => "linkedin_url",
            Field::JoinDate => "join_date",
        }
    }

    fn synonyms(self) -> &'static [&'static str] {
        match self {
            Field::FirstName => &["first_name", "first name", "firstname"],
            Field::LastName => &["last_name", "last name", "lastname"],
            Field::Email => &["email address", "email", "e-mail"],
            Field::Location => &["location", "city", "address"],
            Field::LinkedinUrl => &["linkedin_url", "linkedin url", "linkedin", "social"],
            Field::JoinDate => &["join date", "date", "created", "added"],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<Field, usize>,
}

impl ColumnMapping {
    pub fn from_pairs(pairs: &[(Field, usize)]) -> Self {
        Self {
            columns: pairs.iter().copied().collect(),
        }
    }

    /// Exact header matches first, then the first unclaimed header containing
    /// a synonym. Each column maps to at most one field.
    pub fn discover(headers: &[String]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize(h)).collect();
        let mut columns = BTreeMap::new();
        let mut claimed = HashSet::new();

        for field in Field::ALL {
            if let Some(idx) = normalized.iter().position(|h| h == field.key()) {
                if claimed.insert(idx) {
                    columns.insert(field, idx);
                }
            }
        }

        for field in Field::ALL {
            if columns.contains_key(&field) {
                continue;
            }
            let fuzzy = normalized.iter().enumerate().position(|(idx, h)| {
                !claimed.contains(&idx) && field.synonyms().iter().any(|s| h.contains(s))
            });
            if let Some(idx) = fuzzy {
                claimed.insert(idx);
                columns.insert(field, idx);
            }
        }

        Self { columns }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, usize)> + '_ {
        self.columns.iter().map(|(f, i)| (*f, *i))
    }

    /// Primary email column followed by the secondary ones.
    pub fn email_columns(&self) -> Vec<usize> {
        self.get(Field::Email)
            .into_iter()
            .chain(SECONDARY_EMAIL_COLUMNS)
            .collect()
    }

    /// Every column checked for existing emails: the written ones plus H.
    pub fn scanned_email_columns(&self) -> Vec<usize> {
        let mut columns = self.email_columns();
        for column in LEGACY_EMAIL_COLUMNS {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }
}

/// Assign emails to the primary column, then the secondary ones, skipping
/// columns that are unmapped or past the row width.
pub fn distribute_emails(emails: &[String], mapping: &ColumnMapping, width: usize) -> Vec<(usize, String)> {
    let mut assigned = Vec::new();
    let mut remaining = emails.iter().filter(|e| !e.trim().is_empty());

    for column in mapping.email_columns() {
        if column >= width || assigned.iter().any(|(c, _)| *c == column) {
            continue;
        }
        match remaining.next() {
            Some(email) => assigned.push((column, email.trim().to_string())),
            None => break,
        }
    }
    assigned
}

pub fn build_row(
    candidate: &FilteredCandidate,
    mapping: &ColumnMapping,
    width: usize,
    join_date: &str,
) -> Vec<String> {
    let mut row = vec![String::new(); width];
    let (first, last) = split_name(&candidate.name);

    let mut set = |field: Field, value: &str| {
        if let Some(idx) = mapping.get(field).filter(|idx| *idx < width) {
            row[idx] = value.to_string();
        }
    };
    set(Field::FirstName, &first);
    set(Field::LastName, &last);
    set(Field::Location, &candidate.location);
    set(Field::LinkedinUrl, &candidate.linkedin_url);
    set(Field::JoinDate, join_date);

    for (column, email) in distribute_emails(&candidate.all_emails, mapping, width) {
        row[column] = email;
    }
    row
}

// --- Existing entries ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateReason {
    Email(String),
    Name(String),
    LinkedinUsername(String),
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::Email(e) => write!(f, "email '{}' already exists", e),
            DuplicateReason::Name(n) => write!(f, "name '{}' already exists", n),
            DuplicateReason::LinkedinUsername(u) => write!(f, "LinkedIn username '{}' already exists", u),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    New,
    Duplicate(DuplicateReason),
    /// No email to reach them at; skipped rather than treated as a duplicate.
    NoEmail,
}

#[derive(Debug, Default, Clone)]
pub struct ExistingEntries {
    pub emails: HashSet<String>,
    pub names: HashSet<String>,
    pub linkedin_usernames: HashSet<String>,
}

impl ExistingEntries {
    /// Build the lookup sets from every data row (the header row is skipped).
    pub fn scan(rows: &[Vec<String>], mapping: &ColumnMapping) -> Self {
        let mut existing = Self::default();
        let email_columns = mapping.scanned_email_columns();
        let cell = |row: &Vec<String>, idx: usize| row.get(idx).map(|v| v.trim()).unwrap_or_default().to_string();

        for row in rows.iter().skip(1) {
            for &col in &email_columns {
                let email = normalize(&cell(row, col));
                if !email.is_empty() {
                    existing.emails.insert(email);
                }
            }

            if let (Some(first_col), Some(last_col)) = (mapping.get(Field::FirstName), mapping.get(Field::LastName)) {
                let full = normalize_name(&format!("{} {}", cell(row, first_col), cell(row, last_col)));
                if !full.is_empty() {
                    existing.names.insert(full);
                }
            }

            if let Some(url_col) = mapping.get(Field::LinkedinUrl) {
                if let Some(username) = extract_linkedin_username(&cell(row, url_col)) {
                    existing.linkedin_usernames.insert(username);
                }
            }
        }
        existing
    }

    /// Checks run in priority order: email, full name, LinkedIn username.
    pub fn classify(&self, candidate: &FilteredCandidate) -> Verdict {
        let emails: Vec<String> = candidate
            .all_emails
            .iter()
            .map(|e| normalize(e))
            .filter(|e| !e.is_empty())
            .collect();
        if emails.is_empty() {
            return Verdict::NoEmail;
        }

        if let Some(email) = emails.iter().find(|e| self.emails.contains(*e)) {
            return Verdict::Duplicate(DuplicateReason::Email(email.clone()));
        }

        let name = normalize_name(&candidate.name);
        if !name.is_empty() && self.names.contains(&name) {
            return Verdict::Duplicate(DuplicateReason::Name(candidate.name.trim().to_string()));
        }

        if let Some(username) = extract_linkedin_username(&candidate.linkedin_url) {
            if self.linkedin_usernames.contains(&username) {
                return Verdict::Duplicate(DuplicateReason::LinkedinUsername(username));
            }
        }

        Verdict::New
    }

    /// Record a candidate that is about to be appended so later candidates in
    /// the same batch are checked against it too.
    pub fn remember(&mut self, candidate: &FilteredCandidate) {
        for email in &candidate.all_emails {
            let email = normalize(email);
            if !email.is_empty() {
                self.emails.insert(email);
            }
        }
        let name = normalize_name(&candidate.name);
        if !name.is_empty() {
            self.names.insert(name);
        }
        if let Some(username) = extract_linkedin_username(&candidate.linkedin_url) {
            self.linkedin_usernames.insert(username);
        }
    }
}
