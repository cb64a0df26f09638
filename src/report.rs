//! Scan findings and their aggregation into the final report
//!
//! Detection passes feed [`ComponentObservation`]s into an [`Aggregator`],
//! the single writer of the scan state. Components are only materialized
//! when the report is built, so a [`Component`] never exists with a version
//! that does not match its vulnerability list.

use crate::reconcile::reconcile;
use crate::target::SiteFindings;
use crate::vuln::{KnowledgeBase, VulnerabilityRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

/// Component type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// WordPress core
    Core,
    /// Plugin
    Plugin,
    /// Theme
    Theme,
    /// TimThumb image script
    Timthumb,
    /// User login
    User,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => write!(f, "Core"),
            Self::Plugin => write!(f, "Plugin"),
            Self::Theme => write!(f, "Theme"),
            Self::Timthumb => write!(f, "Timthumb"),
            Self::User => write!(f, "User"),
        }
    }
}

/// Evidence that a component is installed, produced by a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentObservation {
    pub kind: ComponentKind,
    pub slug: String,
    /// Version strings, one per evidence source that yielded one
    pub versions: Vec<String>,
    /// Version proven by a checksum match
    pub exact_version: Option<String>,
    /// Detection confidence, 0-100
    pub confidence: u8,
}

impl ComponentObservation {
    pub fn new(kind: ComponentKind, slug: impl Into<String>, confidence: u8) -> Self {
        Self {
            kind,
            slug: slug.into(),
            versions: Vec::new(),
            exact_version: None,
            confidence: confidence.min(100),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.versions.push(version.into());
        self
    }
}

/// A detected component with its resolved version and vulnerabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub kind: ComponentKind,
    pub slug: String,
    /// Resolved version, `None` when present but undetermined
    pub version: Option<String>,
    /// Vulnerabilities that apply
    pub vulnerabilities: Vec<VulnerabilityRecord>,
    /// Version-specific vulnerabilities that could not be confirmed
    pub possible_vulnerabilities: Vec<VulnerabilityRecord>,
    pub confidence: u8,
}

impl Component {
    /// Whether any vulnerability (confirmed or possible) is attached
    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerabilities.is_empty() || !self.possible_vulnerabilities.is_empty()
    }
}

/// Outcome of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Untested,
    Valid,
    Invalid,
    Error,
}

/// A username/password pair and its tested status
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub status: CredentialStatus,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            status: CredentialStatus::Untested,
        }
    }
}

/// Probe counters for one component kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Probes dispatched
    pub probed: usize,
    /// Probes that produced an observation
    pub matched: usize,
    /// Probes that failed on transport errors after retries
    pub undetermined: usize,
}

/// Final scan report
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Target URL
    pub url: String,
    /// Site-level findings
    pub findings: SiteFindings,
    /// Components, ordered by kind then slug, unique per (kind, slug)
    pub components: Vec<Component>,
    /// Valid and errored credentials, sorted
    pub credentials: Vec<Credential>,
    /// Probe counters per kind
    pub stats: BTreeMap<ComponentKind, PassStats>,
    /// The scan was stopped before every pass completed
    pub interrupted: bool,
}

impl ScanReport {
    /// Look up a component by kind and slug
    pub fn component(&self, kind: ComponentKind, slug: &str) -> Option<&Component> {
        self.components
            .iter()
            .find(|c| c.kind == kind && c.slug == slug)
    }

    /// All components of one kind
    pub fn components_of(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(move |c| c.kind == kind)
    }

    /// Credentials that authenticated
    pub fn valid_credentials(&self) -> impl Iterator<Item = &Credential> {
        self.credentials
            .iter()
            .filter(|c| c.status == CredentialStatus::Valid)
    }

    /// Count of components with at least one vulnerability
    pub fn vulnerable_count(&self) -> usize {
        self.components.iter().filter(|c| c.is_vulnerable()).count()
    }
}

#[derive(Debug, Default)]
struct Evidence {
    versions: Vec<String>,
    exact: BTreeSet<String>,
    confidence: u8,
}

impl Evidence {
    fn merge(&mut self, observation: ComponentObservation) {
        self.versions.extend(observation.versions);
        self.exact.extend(observation.exact_version);
        self.confidence = self.confidence.max(observation.confidence);
    }

    fn resolve(&self) -> Option<String> {
        if self.exact.is_empty() {
            reconcile(&self.versions).version()
        } else {
            let exact: Vec<&str> = self.exact.iter().map(String::as_str).collect();
            reconcile(&exact).version()
        }
    }
}

#[derive(Debug, Default)]
struct State {
    evidence: BTreeMap<(ComponentKind, String), Evidence>,
    stats: BTreeMap<ComponentKind, PassStats>,
    only_vulnerable: BTreeSet<ComponentKind>,
    credentials: BTreeSet<Credential>,
}

/// Single writer of scan state shared by concurrent passes
///
/// Every mutation takes the one lock, so concurrent probes only ever
/// append evidence.
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<State>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Merge an observation into the evidence for its (kind, slug)
    pub fn record(&self, observation: ComponentObservation) {
        self.with_state(|state| {
            state
                .evidence
                .entry((observation.kind, observation.slug.clone()))
                .or_default()
                .merge(observation);
        });
    }

    /// Count a dispatched probe and how it ended
    pub fn count_probe(&self, kind: ComponentKind, matched: bool, undetermined: bool) {
        self.with_state(|state| {
            let stats = state.stats.entry(kind).or_default();
            stats.probed += 1;
            stats.matched += usize::from(matched);
            stats.undetermined += usize::from(undetermined);
        });
    }

    /// Drop components of this kind that carry no vulnerability from the report
    pub fn only_vulnerable(&self, kind: ComponentKind) {
        self.with_state(|state| {
            state.only_vulnerable.insert(kind);
        });
    }

    /// Record terminal credentials worth reporting
    pub fn record_credentials(&self, credentials: impl IntoIterator<Item = Credential>) {
        self.with_state(|state| {
            state.credentials.extend(
                credentials
                    .into_iter()
                    .filter(|c| matches!(c.status, CredentialStatus::Valid | CredentialStatus::Error)),
            );
        });
    }

    /// Slugs observed so far for a kind, sorted
    pub fn slugs(&self, kind: ComponentKind) -> Vec<String> {
        self.with_state(|state| {
            state
                .evidence
                .keys()
                .filter(|(k, _)| *k == kind)
                .map(|(_, slug)| slug.clone())
                .collect()
        })
    }

    /// Resolve every component and build the report
    pub fn into_report(
        self,
        url: impl Into<String>,
        findings: SiteFindings,
        knowledge_base: &KnowledgeBase,
        interrupted: bool,
    ) -> ScanReport {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);

        let components = state
            .evidence
            .iter()
            .map(|((kind, slug), evidence)| {
                let version = evidence.resolve();
                let matched = match kind {
                    ComponentKind::User => Default::default(),
                    _ => knowledge_base.lookup(*kind, slug, version.as_deref()),
                };
                Component {
                    kind: *kind,
                    slug: slug.clone(),
                    version,
                    vulnerabilities: matched.confirmed,
                    possible_vulnerabilities: matched.possible,
                    confidence: evidence.confidence,
                }
            })
            .filter(|c| !state.only_vulnerable.contains(&c.kind) || c.is_vulnerable())
            .collect();

        ScanReport {
            url: url.into(),
            findings,
            components,
            credentials: state.credentials.into_iter().collect(),
            stats: state.stats,
            interrupted,
        }
    }
}
