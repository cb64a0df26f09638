//! Data file loaders
//!
//! Wordlists are plain text, one candidate per line. A line holds the
//! slug optionally followed by extra paths to fetch as version evidence:
//!
//! ```text
//! # popular plugins
//! akismet changelog.txt
//! hello-dolly
//! ```

use crate::error::{Error, Result};
use crate::fingerprint::FingerprintDb;
use crate::target::malware_pattern;
use crate::vuln::KnowledgeBase;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One wordlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub slug: String,
    /// Extra evidence paths, relative to the component directory
    pub paths: Vec<String>,
}

impl Candidate {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }
}

/// Parse wordlist text, skipping blank lines, comments and duplicates
pub fn parse_wordlist(text: &str) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(slug) = fields.next() else {
            continue;
        };
        let slug = slug.trim_matches('/');
        if slug.is_empty() || !seen.insert(slug) {
            continue;
        }

        candidates.push(Candidate {
            slug: slug.to_string(),
            paths: fields
                .map(|p| p.trim_start_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        });
    }

    candidates
}

/// Parse a password list, one password per line
///
/// Only line terminators are stripped; passwords keep their spaces.
pub fn parse_passwords(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a malware list, one URL regex per line
pub fn parse_malwares(text: &str) -> Result<Vec<Regex>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(malware_pattern)
        .collect()
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::ReadFailed {
        path: path.display().to_string(),
        source,
    })
}

/// Load a wordlist file
pub fn load_wordlist(path: &Path) -> Result<Vec<Candidate>> {
    let candidates = parse_wordlist(&read(path)?);
    debug!(path = %path.display(), count = candidates.len(), "wordlist loaded");
    Ok(candidates)
}

/// Load a password list file
pub fn load_passwords(path: &Path) -> Result<Vec<String>> {
    let passwords = parse_passwords(&read(path)?);
    debug!(path = %path.display(), count = passwords.len(), "passwords loaded");
    Ok(passwords)
}

/// Load a malware list file
pub fn load_malwares(path: &Path) -> Result<Vec<Regex>> {
    let patterns = parse_malwares(&read(path)?)?;
    debug!(path = %path.display(), count = patterns.len(), "malware list loaded");
    Ok(patterns)
}

/// Load and validate the fingerprint database
pub fn load_fingerprints(path: &Path) -> Result<FingerprintDb> {
    FingerprintDb::from_json(&read(path)?)
}

/// Load and validate the vulnerability knowledge base
pub fn load_knowledge_base(path: &Path) -> Result<KnowledgeBase> {
    let kb = KnowledgeBase::from_json(&read(path)?)?;
    debug!(path = %path.display(), records = kb.len(), "knowledge base loaded");
    Ok(kb)
}
