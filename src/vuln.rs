//! Vulnerability knowledge base and lookup
//!
//! Records are keyed by component kind and slug and carry an affected-version
//! predicate. The knowledge base is validated once when loaded; lookups never
//! mutate it.

use crate::error::{Error, Result};
use crate::report::ComponentKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Knowledge base slug shared by every timthumb copy
const TIMTHUMB_SLUG: &str = "timthumb";

/// Compare two version strings semantically
///
/// Dot-separated numeric components are compared left to right, missing
/// trailing components count as zero. When the numeric parts are equal a
/// version without a pre-release suffix is greater (7.0 > 7.0-alpha).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    // Parse version parts, handling alpha/beta/rc suffixes
    fn parse_version(v: &str) -> (Vec<u64>, bool) {
        let v = v.trim().trim_start_matches(['v', 'V']);
        let pos = v.find(|c: char| c == '-' || c.is_ascii_alphabetic());
        let version_part = match pos {
            Some(p) => &v[..p],
            None => v,
        };
        let has_suffix = pos.is_some();

        let parts: Vec<u64> = version_part
            .split('.')
            .filter_map(|p| p.parse().ok())
            .collect();

        (parts, has_suffix)
    }

    let (a_parts, a_has_suffix) = parse_version(a);
    let (b_parts, b_has_suffix) = parse_version(b);

    let max_len = a_parts.len().max(b_parts.len());
    for i in 0..max_len {
        let x = a_parts.get(i).copied().unwrap_or(0);
        let y = b_parts.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    match (a_has_suffix, b_has_suffix) {
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// One end of a version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: String,
    pub inclusive: bool,
}

impl Bound {
    fn new(version: &str, inclusive: bool) -> Self {
        Self {
            version: version.to_string(),
            inclusive,
        }
    }
}

/// Which versions a vulnerability affects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPredicate {
    /// Every version
    Any,
    /// Exactly this version string
    Exact(String),
    /// Versions between optional lower and upper bounds
    Range {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
}

impl VersionPredicate {
    /// Whether this predicate holds regardless of version
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Check a resolved version against the predicate
    pub fn matches(&self, version: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => v == version,
            Self::Range { lower, upper } => {
                let above = lower.as_ref().is_none_or(|b| {
                    match compare_versions(version, &b.version) {
                        Ordering::Greater => true,
                        Ordering::Equal => b.inclusive,
                        Ordering::Less => false,
                    }
                });
                let below = upper.as_ref().is_none_or(|b| {
                    match compare_versions(version, &b.version) {
                        Ordering::Less => true,
                        Ordering::Equal => b.inclusive,
                        Ordering::Greater => false,
                    }
                });
                above && below
            }
        }
    }

    /// Parse an interval such as `[1.0,2.0]` or `(1.0,2.0]`
    fn parse_interval(s: &str) -> Option<Self> {
        let lower_inclusive = match s.chars().next()? {
            '[' => true,
            '(' => false,
            _ => return None,
        };
        let upper_inclusive = match s.chars().last()? {
            ']' => true,
            ')' => false,
            _ => return None,
        };
        let inner = &s[1..s.len() - 1];
        let (lo, hi) = inner.split_once(',')?;
        let (lo, hi) = (lo.trim(), hi.trim());

        let bound = |v: &str, inclusive: bool| {
            (!v.is_empty()).then(|| Bound::new(v, inclusive))
        };
        let (lower, upper) = (bound(lo, lower_inclusive), bound(hi, upper_inclusive));
        (lower.is_some() || upper.is_some()).then_some(Self::Range { lower, upper })
    }

    /// Parse a comparator list such as `>=1.0, <1.2.0`
    fn parse_comparators(s: &str) -> Option<Self> {
        let mut lower = None;
        let mut upper = None;

        for token in s.split([',', ' ']).filter(|t| !t.is_empty()) {
            let (op, version) = if let Some(v) = token.strip_prefix(">=") {
                (">=", v)
            } else if let Some(v) = token.strip_prefix("<=") {
                ("<=", v)
            } else if let Some(v) = token.strip_prefix('>') {
                (">", v)
            } else if let Some(v) = token.strip_prefix('<') {
                ("<", v)
            } else {
                return None;
            };
            if version.is_empty() || !version.starts_with(|c: char| c.is_ascii_digit()) {
                return None;
            }
            let slot = if op.starts_with('>') { &mut lower } else { &mut upper };
            if slot.is_some() {
                return None;
            }
            *slot = Some(Bound::new(version, op.ends_with('=')));
        }

        (lower.is_some() || upper.is_some()).then_some(Self::Range { lower, upper })
    }
}

impl FromStr for VersionPredicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || Error::InvalidPredicate(s.to_string());

        if trimmed.is_empty() {
            return Err(invalid());
        }
        if trimmed == "*" || trimmed.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }
        if trimmed.starts_with(['[', '(']) {
            return Self::parse_interval(trimmed).ok_or_else(invalid);
        }
        if trimmed.starts_with(['<', '>']) {
            return Self::parse_comparators(trimmed).ok_or_else(invalid);
        }

        let exact = trimmed.strip_prefix('=').unwrap_or(trimmed).trim();
        if !exact.starts_with(|c: char| c.is_ascii_alphanumeric())
            || exact.contains(char::is_whitespace)
        {
            return Err(invalid());
        }
        Ok(Self::Exact(exact.to_string()))
    }
}

impl fmt::Display for VersionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "={}", v),
            Self::Range { lower, upper } => {
                let mut parts = Vec::new();
                if let Some(b) = lower {
                    parts.push(format!("{}{}", if b.inclusive { ">=" } else { ">" }, b.version));
                }
                if let Some(b) = upper {
                    parts.push(format!("{}{}", if b.inclusive { "<=" } else { "<" }, b.version));
                }
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

impl TryFrom<String> for VersionPredicate {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A known vulnerability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VulnerabilityRecord {
    /// Unique record id
    pub id: String,
    /// Component kind the record applies to
    pub kind: ComponentKind,
    /// Component slug
    pub slug: String,
    /// Short title
    pub title: String,
    /// Affected versions
    #[serde(
        serialize_with = "serialize_predicate",
        deserialize_with = "deserialize_predicate"
    )]
    pub affected: VersionPredicate,
    /// Reference URLs
    #[serde(default)]
    pub references: Vec<String>,
}

fn serialize_predicate<S: serde::Serializer>(
    p: &VersionPredicate,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(p)
}

fn deserialize_predicate<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<VersionPredicate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    VersionPredicate::try_from(raw).map_err(serde::de::Error::custom)
}

/// Records applicable to one component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VulnerabilityMatch {
    /// Records that definitely apply
    pub confirmed: Vec<VulnerabilityRecord>,
    /// Version-specific records that could not be confirmed (version unknown)
    pub possible: Vec<VulnerabilityRecord>,
}

impl VulnerabilityMatch {
    /// No confirmed and no possible records
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.possible.is_empty()
    }
}

/// Read-only vulnerability knowledge base
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    records: HashMap<(ComponentKind, String), Vec<VulnerabilityRecord>>,
    len: usize,
}

impl KnowledgeBase {
    /// Build a knowledge base from records, validating every one
    ///
    /// Any malformed record rejects the whole set.
    pub fn new(records: Vec<VulnerabilityRecord>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut by_key: HashMap<(ComponentKind, String), Vec<VulnerabilityRecord>> =
            HashMap::new();
        let len = records.len();

        for record in records {
            if record.id.trim().is_empty() {
                return Err(Error::InvalidKnowledgeBase(format!(
                    "record for '{}' has an empty id",
                    record.slug
                )));
            }
            if record.slug.trim().is_empty() || record.title.trim().is_empty() {
                return Err(Error::InvalidKnowledgeBase(format!(
                    "record '{}' has an empty slug or title",
                    record.id
                )));
            }
            if !ids.insert(record.id.clone()) {
                return Err(Error::InvalidKnowledgeBase(format!(
                    "duplicate record id '{}'",
                    record.id
                )));
            }
            by_key
                .entry((record.kind, record.slug.clone()))
                .or_default()
                .push(record);
        }

        for list in by_key.values_mut() {
            list.sort_by(|a, b| a.id.cmp(&b.id));
        }

        Ok(Self {
            records: by_key,
            len,
        })
    }

    /// Parse and validate a JSON array of records
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<VulnerabilityRecord> = serde_json::from_str(json)
            .map_err(|e| Error::InvalidKnowledgeBase(e.to_string()))?;
        Self::new(records)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the knowledge base holds no records
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records applicable to a component
    ///
    /// Without a version, "any version" records are confirmed and every
    /// version-specific record is returned as possibly affecting it.
    pub fn lookup(
        &self,
        kind: ComponentKind,
        slug: &str,
        version: Option<&str>,
    ) -> VulnerabilityMatch {
        let slug = match kind {
            ComponentKind::Timthumb => TIMTHUMB_SLUG,
            _ => slug,
        };
        let Some(records) = self.records.get(&(kind, slug.to_string())) else {
            return VulnerabilityMatch::default();
        };

        let mut result = VulnerabilityMatch::default();
        for record in records {
            match version {
                Some(v) if record.affected.matches(v) => result.confirmed.push(record.clone()),
                Some(_) => {}
                None if record.affected.is_any() => result.confirmed.push(record.clone()),
                None => result.possible.push(record.clone()),
            }
        }
        result
    }
}
