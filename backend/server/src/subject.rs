//! Subject ids as handed to us by the catalog.
//!
//! The ledger never checks that a subject exists, only that the id is
//! well formed: 1 to 64 characters of `[A-Za-z0-9_.-]`, starting with an
//! alphanumeric, after trimming surrounding whitespace.
use std::{collections::HashSet, fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::error::LedgerError;

static SUBJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("subject pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let trimmed = raw.trim();

        if !SUBJECT_PATTERN.is_match(trimmed) {
            return Err(LedgerError::InvalidSubject(raw.to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Ids read back from the edge table were validated on the way in.
    pub(crate) fn from_stored(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SubjectId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses a comma separated id list, dropping blanks and duplicates while
/// keeping first-seen order.
pub fn parse_subject_list(raw: &str, max: usize) -> Result<Vec<SubjectId>, LedgerError> {
    let mut seen = HashSet::new();
    let mut subjects = Vec::new();

    for part in raw.split(',').filter(|part| !part.trim().is_empty()) {
        let subject = SubjectId::parse(part)?;

        if seen.insert(subject.clone()) {
            subjects.push(subject);
        }
    }

    if subjects.is_empty() {
        return Err(LedgerError::InvalidSubject(raw.to_string()));
    }

    if subjects.len() > max {
        return Err(LedgerError::BatchTooLarge {
            len: subjects.len(),
            max,
        });
    }

    Ok(subjects)
}
