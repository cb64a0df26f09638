//! Enumeration engine
//!
//! Passive detection reads the homepage snapshot and a handful of well-known
//! files. Aggressive detection probes one wordlist candidate per task through
//! a bounded pool; every outcome is merged into the shared [`Aggregator`].

use crate::data::Candidate;
use crate::fingerprint::{
    Evidence, FingerprintDb, FingerprintMatcher, PASSIVE_CONFIDENCE, meta_generator_version,
    plausible_version,
};
use crate::report::{Aggregator, ComponentKind, ComponentObservation};
use crate::target::Target;
use futures::stream::{self, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Slugs that show up under the plugins directory without being plugins
const SKIP_PLUGIN_SLUGS: &[&str] = &["index", "cache"];

/// Core files carrying a version string
const CORE_VERSION_PATHS: &[&str] = &["feed/", "readme.html", "wp-links-opml.php"];

/// Locations of TimThumb inside a theme
const THEME_TIMTHUMB_PATHS: &[&str] = &[
    "timthumb.php",
    "lib/timthumb.php",
    "inc/timthumb.php",
    "includes/timthumb.php",
    "scripts/timthumb.php",
    "tools/timthumb.php",
    "functions/timthumb.php",
    "thumb.php",
];

/// Author archive IDs probed by default
pub const DEFAULT_USER_IDS: RangeInclusive<u32> = 1..=10;

static AUTHOR_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/author/([^/?#]+)/?").unwrap());
static AUTHOR_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bauthor-([^\s'\x22]+)").unwrap());

/// Cooperative cancellation flag shared by every pass
///
/// Once set, no new probe is dispatched; probes in flight complete.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives progress notifications; never affects results
pub trait ProgressObserver: Send + Sync {
    /// A pass of `total` probes starts
    fn pass_started(&self, _kind: ComponentKind, _total: usize) {}

    /// One probe of the current pass completed
    fn probe_finished(&self, _kind: ComponentKind) {}

    /// The current pass completed or was stopped
    fn pass_finished(&self, _kind: ComponentKind) {}

    /// A login attempt was rejected (verbose credential testing only)
    fn login_failed(&self, _username: &str, _password: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Result of probing one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found(ComponentObservation),
    Absent,
    /// Transport failed after retries
    Undetermined,
}

/// Directory of a component kind inside the content directory
fn kind_dir(kind: ComponentKind) -> Option<&'static str> {
    match kind {
        ComponentKind::Plugin => Some("plugins"),
        ComponentKind::Theme => Some("themes"),
        _ => None,
    }
}

/// File probed to confirm presence
fn presence_path(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Theme => "style.css",
        _ => "readme.txt",
    }
}

/// Runs detection passes against one target
pub struct Enumerator<'a> {
    target: &'a Target,
    fingerprints: &'a FingerprintDb,
    aggregator: &'a Aggregator,
    observer: &'a dyn ProgressObserver,
    stop: StopSignal,
    threads: usize,
    exclude_content: Option<&'a Regex>,
    exclude_body: Option<&'a Regex>,
}

impl<'a> Enumerator<'a> {
    pub fn new(
        target: &'a Target,
        fingerprints: &'a FingerprintDb,
        aggregator: &'a Aggregator,
    ) -> Self {
        Self {
            target,
            fingerprints,
            aggregator,
            observer: &NoProgress,
            stop: StopSignal::default(),
            threads: 1,
            exclude_content: None,
            exclude_body: None,
        }
    }

    /// Maximum number of probes in flight
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Skip candidates whose slug matches
    pub fn exclude_content(mut self, pattern: Option<&'a Regex>) -> Self {
        self.exclude_content = pattern;
        self
    }

    /// Treat responses whose body matches as absent
    pub fn exclude_body(mut self, pattern: Option<&'a Regex>) -> Self {
        self.exclude_body = pattern;
        self
    }

    fn matcher(&self) -> FingerprintMatcher<'a> {
        FingerprintMatcher::new(self.fingerprints).exclude_body(self.exclude_body)
    }

    async fn fetch(&self, path: &str) -> Option<Evidence> {
        let url = self.target.url_for(path).ok()?;
        match self.target.http().get(&url).await {
            Ok(response) => Some(Evidence::from_response(path, response)),
            Err(e) => {
                debug!(%url, error = %e, "evidence unavailable");
                None
            }
        }
    }

    /// Core version from the homepage and well-known files
    pub async fn passive_core(&self) {
        let mut evidence = Vec::new();
        let core_paths = CORE_VERSION_PATHS.iter().copied().chain(
            self.fingerprints
                .signatures(ComponentKind::Core, "wordpress")
                .iter()
                .map(|s| s.path.as_str()),
        );
        for path in core_paths.collect::<BTreeSet<_>>() {
            evidence.extend(self.fetch(path).await);
        }

        let mut observation = self.matcher().observe_core(&evidence);
        if let Some(version) = meta_generator_version(self.target.homepage()) {
            let base = observation.unwrap_or_else(|| {
                ComponentObservation::new(ComponentKind::Core, "wordpress", PASSIVE_CONFIDENCE)
            });
            observation = Some(base.with_version(version));
        }

        match observation {
            Some(observation) => {
                info!(versions = ?observation.versions, exact = ?observation.exact_version, "core version evidence");
                self.aggregator.record(observation);
            }
            None => info!("core version not found"),
        }
    }

    /// Plugins referenced by the homepage (including mu-plugins)
    pub fn passive_plugins(&self) {
        for observation in self.passive_slugs(ComponentKind::Plugin) {
            self.aggregator.record(observation);
        }
    }

    /// Themes referenced by the homepage
    pub fn passive_themes(&self) {
        for observation in self.passive_slugs(ComponentKind::Theme) {
            self.aggregator.record(observation);
        }
    }

    fn passive_slugs(&self, kind: ComponentKind) -> Vec<ComponentObservation> {
        let dir = match kind {
            ComponentKind::Plugin => "(?:mu-)?plugins",
            ComponentKind::Theme => "themes",
            _ => return Vec::new(),
        };
        let content_dir = regex::escape(self.target.content_dir());
        let Ok(slug_re) = Regex::new(&format!(r"/{content_dir}/{dir}/([a-zA-Z0-9_-]+)/")) else {
            return Vec::new();
        };

        let html = self.target.homepage();
        let slugs: BTreeSet<&str> = slug_re
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|slug| kind != ComponentKind::Plugin || !SKIP_PLUGIN_SLUGS.contains(slug))
            .filter(|slug| !self.is_excluded(slug))
            .collect();

        slugs
            .into_iter()
            .map(|slug| {
                let mut observation = ComponentObservation::new(kind, slug, PASSIVE_CONFIDENCE);
                let version_re = format!(
                    r#"/{content_dir}/{dir}/{}/[^'"]*\?[^'"]*ver=([0-9a-zA-Z._-]+)"#,
                    regex::escape(slug)
                );
                if let Ok(re) = Regex::new(&version_re) {
                    observation.versions.extend(
                        re.captures_iter(html)
                            .filter_map(|caps| caps.get(1))
                            .map(|m| m.as_str())
                            .filter(|v| plausible_version(v))
                            .map(str::to_string)
                            .collect::<BTreeSet<_>>(),
                    );
                }
                debug!(%kind, slug, versions = ?observation.versions, "passive match");
                observation
            })
            .collect()
    }

    /// Detect the main theme from the homepage stylesheets and read its style.css
    ///
    /// Returns the theme slug.
    pub async fn main_theme(&self) -> Option<String> {
        let slug = self.main_theme_slug()?;
        let path = format!("themes/{}/style.css", slug);
        let url = self.target.content_url(&path).ok()?;

        let mut observation = ComponentObservation::new(ComponentKind::Theme, &slug, PASSIVE_CONFIDENCE);
        if let Ok(response) = self.target.http().get(&url).await {
            let evidence = [Evidence::from_response("style.css", response)];
            if let Some(found) = self.matcher().observe(ComponentKind::Theme, &slug, &evidence) {
                observation = found;
            }
        }
        info!(slug = %slug, versions = ?observation.versions, "main theme");
        self.aggregator.record(observation);
        Some(slug)
    }

    fn main_theme_slug(&self) -> Option<String> {
        let content_dir = regex::escape(self.target.content_dir());
        let theme_re = Regex::new(&format!(r"/{content_dir}/themes/([^/'\x22?#]+)/")).ok()?;

        let document = Html::parse_document(self.target.homepage());
        let selector = Selector::parse("link[rel='stylesheet']").ok()?;
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href")
                && let Some(caps) = theme_re.captures(href)
            {
                return caps.get(1).map(|m| m.as_str().to_string());
            }
        }

        theme_re
            .captures(self.target.homepage())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn is_excluded(&self, slug: &str) -> bool {
        self.exclude_content.is_some_and(|re| re.is_match(slug))
    }

    /// Probe every wordlist candidate of a plugin or theme pass
    pub async fn aggressive(&self, kind: ComponentKind, candidates: &[Candidate]) {
        let Some(dir) = kind_dir(kind) else {
            return;
        };
        let dispatched: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| !self.is_excluded(&c.slug))
            .collect();

        self.run_pass(kind, dispatched, |candidate| {
            self.probe_component(kind, dir, candidate)
        })
        .await;
    }

    /// Probe TimThumb paths, relative to the content directory
    ///
    /// Paths inside the main theme are added to the wordlist.
    pub async fn timthumbs(&self, paths: &[Candidate], main_theme: Option<&str>) {
        let mut all: BTreeSet<String> = paths
            .iter()
            .filter(|c| !self.is_excluded(&c.slug))
            .map(|c| c.slug.clone())
            .collect();
        if let Some(theme) = main_theme {
            all.extend(
                THEME_TIMTHUMB_PATHS
                    .iter()
                    .map(|p| format!("themes/{}/{}", theme, p)),
            );
        }

        let paths: Vec<&str> = all.iter().map(String::as_str).collect();
        self.run_pass(ComponentKind::Timthumb, paths, |path| self.probe_timthumb(path))
            .await;
    }

    /// Find user logins through author archives
    pub async fn users(&self, ids: RangeInclusive<u32>) {
        let ids: Vec<u32> = ids.collect();
        self.run_pass(ComponentKind::User, ids, |id| self.probe_author(id))
            .await;
    }

    async fn run_pass<T, F, Fut>(&self, kind: ComponentKind, items: Vec<T>, probe: F)
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = ProbeOutcome>,
    {
        info!(%kind, probes = items.len(), threads = self.threads, "pass started");
        self.observer.pass_started(kind, items.len());

        stream::iter(items)
            .take_while(|_| futures::future::ready(!self.stop.is_stopped()))
            .map(probe)
            .buffer_unordered(self.threads)
            .for_each(|outcome| {
                self.settle(kind, outcome);
                futures::future::ready(())
            })
            .await;

        self.observer.pass_finished(kind);
        if self.stop.is_stopped() {
            info!(%kind, "pass interrupted");
        }
    }

    fn settle(&self, kind: ComponentKind, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Found(observation) => {
                debug!(%kind, slug = %observation.slug, "found");
                self.aggregator.record(observation);
                self.aggregator.count_probe(kind, true, false);
            }
            ProbeOutcome::Absent => self.aggregator.count_probe(kind, false, false),
            ProbeOutcome::Undetermined => self.aggregator.count_probe(kind, false, true),
        }
        self.observer.probe_finished(kind);
    }

    async fn probe_component(
        &self,
        kind: ComponentKind,
        dir: &str,
        candidate: &Candidate,
    ) -> ProbeOutcome {
        let base = format!("{}/{}/", dir, candidate.slug);
        let primary_path = presence_path(kind);
        let Ok(url) = self.target.content_url(&format!("{base}{primary_path}")) else {
            return ProbeOutcome::Absent;
        };

        let primary = match self.target.http().get(&url).await {
            Ok(response) => Evidence::from_response(primary_path, response),
            Err(e) => {
                debug!(%url, error = %e, "probe undetermined");
                return ProbeOutcome::Undetermined;
            }
        };

        let matcher = self.matcher();
        if !matcher.is_present(kind, &primary) {
            return ProbeOutcome::Absent;
        }

        let extra: BTreeSet<&str> = candidate
            .paths
            .iter()
            .map(String::as_str)
            .chain(
                self.fingerprints
                    .signatures(kind, &candidate.slug)
                    .iter()
                    .map(|s| s.path.as_str()),
            )
            .filter(|p| *p != primary_path)
            .collect();

        let mut evidence = vec![primary];
        for path in extra {
            let Ok(url) = self.target.content_url(&format!("{base}{path}")) else {
                continue;
            };
            if let Ok(response) = self.target.http().get(&url).await {
                evidence.push(Evidence::from_response(path, response));
            }
        }

        match matcher.observe(kind, &candidate.slug, &evidence) {
            Some(observation) => ProbeOutcome::Found(observation),
            None => ProbeOutcome::Absent,
        }
    }

    async fn probe_timthumb(&self, path: &str) -> ProbeOutcome {
        let Ok(url) = self.target.content_url(path) else {
            return ProbeOutcome::Absent;
        };
        let slug = format!("{}/{}", self.target.content_dir(), path);

        match self.target.http().get(&url).await {
            Ok(response) => {
                let evidence = [Evidence::from_response(slug.as_str(), response)];
                match self.matcher().observe(ComponentKind::Timthumb, &slug, &evidence) {
                    Some(observation) => ProbeOutcome::Found(observation),
                    None => ProbeOutcome::Absent,
                }
            }
            Err(e) => {
                debug!(%url, error = %e, "probe undetermined");
                ProbeOutcome::Undetermined
            }
        }
    }

    async fn probe_author(&self, id: u32) -> ProbeOutcome {
        let Ok(url) = self.target.url_for(&format!("?author={}", id)) else {
            return ProbeOutcome::Absent;
        };

        let response = match self.target.http().get(&url).await {
            Ok(response) => response,
            Err(e) => {
                debug!(%url, error = %e, "probe undetermined");
                return ProbeOutcome::Undetermined;
            }
        };

        let login = match response.status {
            301 | 302 => response
                .redirect_location()
                .and_then(|location| AUTHOR_LOCATION_RE.captures(location))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            200 => login_from_body_class(&response.text()),
            _ => None,
        };

        match login {
            Some(login) => {
                debug!(id, login = %login, "user found");
                ProbeOutcome::Found(ComponentObservation::new(ComponentKind::User, login, 100))
            }
            None => ProbeOutcome::Absent,
        }
    }
}

/// Login from the `author-<login>` body class of an author archive
///
/// Archives also carry an `author-<id>` class, which is skipped.
fn login_from_body_class(html: &str) -> Option<String> {
    AUTHOR_CLASS_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|login| !login.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}
