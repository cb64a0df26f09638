//! Version signature reconciliation
//!
//! Several evidence sources (readme, changelog, generator tag, asset query
//! strings) may report slightly different version strings for the same
//! component. The reconciled version is the longest trailing substring that
//! every source agrees on.

/// Outcome of reconciling a set of version strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// No non-empty evidence at all
    Nothing,
    /// Exactly one non-empty entry, returned untouched
    Single(String),
    /// Longest common trailing substring of two or more entries (may be empty)
    Common(String),
}

impl Reconciled {
    /// The version conclusion, `None` when the evidence supports no version
    pub fn version(self) -> Option<String> {
        match self {
            Self::Nothing => None,
            Self::Single(v) | Self::Common(v) if v.is_empty() => None,
            Self::Single(v) | Self::Common(v) => Some(v),
        }
    }
}

/// Reconcile version evidence into a single conclusion
///
/// Characters are compared literally; no separator or prefix normalization
/// is applied, so `"v4.7.1"` and `"4.7.1"` agree on `"4.7.1"` while
/// `"4.7.1"` and `"4.7.1-beta"` agree on nothing.
pub fn reconcile<S: AsRef<str>>(entries: &[S]) -> Reconciled {
    let entries: Vec<&str> = entries
        .iter()
        .map(|s| s.as_ref())
        .filter(|s| !s.is_empty())
        .collect();

    match entries.as_slice() {
        [] => Reconciled::Nothing,
        [only] => Reconciled::Single((*only).to_string()),
        _ => Reconciled::Common(common_suffix(&entries)),
    }
}

/// Longest trailing substring shared by every entry
fn common_suffix(entries: &[&str]) -> String {
    let mut tails: Vec<std::iter::Rev<std::str::Chars<'_>>> =
        entries.iter().map(|s| s.chars().rev()).collect();
    let mut matched = Vec::new();

    'walk: loop {
        let mut expected = None;
        for tail in &mut tails {
            match (tail.next(), expected) {
                (None, _) => break 'walk,
                (Some(c), None) => expected = Some(c),
                (Some(c), Some(e)) if c != e => break 'walk,
                (Some(_), Some(_)) => {}
            }
        }
        match expected {
            Some(c) => matched.push(c),
            None => break,
        }
    }

    matched.iter().rev().collect()
}
