//! Fingerprint database and matcher
//!
//! Turns probe evidence (status and body of fetched files) into component
//! observations. Version strings come from built-in extractors for the
//! well-known WordPress files and from the signatures of the fingerprint
//! database; checksum signatures yield exact versions.

use crate::error::{Error, Result};
use crate::http::{ProbeResponse, body_md5};
use crate::report::{ComponentKind, ComponentObservation};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Confidence of a slug seen in the homepage only
pub const PASSIVE_CONFIDENCE: u8 = 50;
/// Confidence of a component whose path answered 200/403
pub const PRESENCE_CONFIDENCE: u8 = 80;
/// Confidence once a version string was extracted
pub const VERSION_CONFIDENCE: u8 = 90;
/// Confidence of a checksum match
pub const CHECKSUM_CONFIDENCE: u8 = 100;

static README_TXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:stable tag|version):\s*([0-9a-z.\-]+)").unwrap()
});
static STYLE_CSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bVersion:\s*([0-9a-z.\-]+)").unwrap());
static CHANGELOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s=#*\[]*(?:version\s+)?v?(\d+(?:\.\d+)+(?:-[0-9a-z.]+)?)").unwrap()
});
static CORE_README_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Version\s+([0-9.]+)").unwrap());
static FEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"wordpress\.org/\?v=([0-9.]+)").unwrap());
static OPML_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)generator="WordPress/([0-9.]+)""#).unwrap());
static TIMTHUMB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TimThumb version\s*:\s*([^\s<]+)").unwrap());
/// Body of a TimThumb script called without parameters
const TIMTHUMB_MARKER: &str = "no image specified";

static MD5_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").unwrap());

/// One fetched file used as evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    /// Path relative to the component directory (or the site, for core)
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Evidence {
    pub fn new(path: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            status,
            body: body.into(),
        }
    }

    pub fn from_response(path: impl Into<String>, response: ProbeResponse) -> Self {
        Self::new(path, response.status, response.body)
    }

    fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    fn md5(&self) -> String {
        body_md5(&self.body)
    }

    /// Last path segment
    fn file_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSignature {
    path: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    checksums: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDatabase {
    #[serde(default)]
    core: Vec<RawSignature>,
    #[serde(default)]
    plugins: HashMap<String, Vec<RawSignature>>,
    #[serde(default)]
    themes: HashMap<String, Vec<RawSignature>>,
}

/// What a signature found in one piece of evidence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Hit {
    version: Option<String>,
    exact: Option<String>,
}

/// A known file of a component and how to read a version from it
#[derive(Debug, Clone)]
pub struct Signature {
    pub path: String,
    pattern: Option<Regex>,
    version: Option<String>,
    checksums: HashMap<String, String>,
}

impl Signature {
    /// Build and validate a signature
    ///
    /// `pattern` may capture the version in group 1; otherwise a match
    /// implies `version`. `checksums` maps md5 hex digests to versions.
    pub fn new(
        path: impl Into<String>,
        pattern: Option<&str>,
        version: Option<&str>,
        checksums: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let path = path.into().trim_start_matches('/').to_string();
        if path.is_empty() {
            return Err(Error::InvalidFingerprints("signature with empty path".into()));
        }

        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|source| Error::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;

        let checksums = checksums
            .into_iter()
            .map(|(hash, version)| {
                let hash = hash.to_ascii_lowercase();
                if MD5_RE.is_match(&hash) {
                    Ok((hash, version))
                } else {
                    Err(Error::InvalidFingerprints(format!(
                        "'{}' in {} is not an md5 digest",
                        hash, path
                    )))
                }
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            path,
            pattern,
            version: version.map(str::to_string),
            checksums,
        })
    }

    fn from_raw(raw: RawSignature) -> Result<Self> {
        Self::new(
            raw.path,
            raw.pattern.as_deref(),
            raw.version.as_deref(),
            raw.checksums,
        )
    }

    fn evaluate(&self, evidence: &Evidence) -> Hit {
        if evidence.status != 200 {
            return Hit::default();
        }

        let exact = (!self.checksums.is_empty())
            .then(|| self.checksums.get(&evidence.md5()).cloned())
            .flatten();

        let version = match &self.pattern {
            Some(re) => re.captures(&evidence.text()).and_then(|caps| {
                caps.get(1)
                    .map(|m| m.as_str().to_string())
                    .or_else(|| self.version.clone())
            }),
            None if self.checksums.is_empty() => self.version.clone(),
            None => None,
        };

        Hit { version, exact }
    }
}

/// Read-only fingerprint database
#[derive(Debug, Clone, Default)]
pub struct FingerprintDb {
    core: Vec<Signature>,
    plugins: HashMap<String, Vec<Signature>>,
    themes: HashMap<String, Vec<Signature>>,
}

impl FingerprintDb {
    /// Parse and validate the JSON database
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawDatabase =
            serde_json::from_str(json).map_err(|e| Error::InvalidFingerprints(e.to_string()))?;

        let convert = |map: HashMap<String, Vec<RawSignature>>| {
            map.into_iter()
                .map(|(slug, sigs)| {
                    let sigs = sigs
                        .into_iter()
                        .map(Signature::from_raw)
                        .collect::<Result<Vec<_>>>()?;
                    Ok((slug, sigs))
                })
                .collect::<Result<HashMap<_, _>>>()
        };

        Ok(Self {
            core: raw
                .core
                .into_iter()
                .map(Signature::from_raw)
                .collect::<Result<_>>()?,
            plugins: convert(raw.plugins)?,
            themes: convert(raw.themes)?,
        })
    }

    /// Signatures known for a component
    pub fn signatures(&self, kind: ComponentKind, slug: &str) -> &[Signature] {
        let found = match kind {
            ComponentKind::Core => return &self.core,
            ComponentKind::Plugin => self.plugins.get(slug),
            ComponentKind::Theme => self.themes.get(slug),
            ComponentKind::Timthumb | ComponentKind::User => None,
        };
        found.map(Vec::as_slice).unwrap_or_default()
    }
}

/// Maps probe evidence to component observations
#[derive(Debug, Clone, Copy)]
pub struct FingerprintMatcher<'a> {
    db: &'a FingerprintDb,
    exclude_body: Option<&'a Regex>,
}

impl<'a> FingerprintMatcher<'a> {
    pub fn new(db: &'a FingerprintDb) -> Self {
        Self {
            db,
            exclude_body: None,
        }
    }

    /// Treat responses whose body matches `pattern` as absent
    pub fn exclude_body(mut self, pattern: Option<&'a Regex>) -> Self {
        self.exclude_body = pattern;
        self
    }

    fn excluded(&self, evidence: &Evidence) -> bool {
        self.exclude_body
            .is_some_and(|re| re.is_match(&evidence.text()))
    }

    /// Whether a primary probe confirms presence
    ///
    /// TimThumb answers 400 "no image specified" when called bare; every
    /// other kind is present on 200 or 403.
    pub fn is_present(&self, kind: ComponentKind, primary: &Evidence) -> bool {
        let answered = match kind {
            ComponentKind::Timthumb => {
                primary.status == 400
                    && primary
                        .text()
                        .to_ascii_lowercase()
                        .contains(TIMTHUMB_MARKER)
            }
            _ => matches!(primary.status, 200 | 403),
        };
        answered && !self.excluded(primary)
    }

    /// Match the evidence of one candidate
    ///
    /// The first evidence is the presence probe; without presence there
    /// is no observation, whatever the other files say.
    pub fn observe(
        &self,
        kind: ComponentKind,
        slug: &str,
        evidence: &[Evidence],
    ) -> Option<ComponentObservation> {
        let primary = evidence.first()?;
        if !self.is_present(kind, primary) {
            return None;
        }

        let mut observation = ComponentObservation::new(kind, slug, PRESENCE_CONFIDENCE);
        self.collect_versions(&mut observation, evidence);
        Some(observation)
    }

    /// Collect core version evidence from independently fetched files
    ///
    /// Returns `None` when no file yielded a version.
    pub fn observe_core(&self, evidence: &[Evidence]) -> Option<ComponentObservation> {
        let mut observation =
            ComponentObservation::new(ComponentKind::Core, "wordpress", PASSIVE_CONFIDENCE);
        self.collect_versions(&mut observation, evidence);
        (!observation.versions.is_empty() || observation.exact_version.is_some())
            .then_some(observation)
    }

    fn collect_versions(&self, observation: &mut ComponentObservation, evidence: &[Evidence]) {
        let signatures = self.db.signatures(observation.kind, &observation.slug);

        for item in evidence {
            let readable = match observation.kind {
                ComponentKind::Timthumb => matches!(item.status, 200 | 400),
                _ => item.status == 200,
            };
            if !readable || self.excluded(item) {
                continue;
            }
            if let Some(version) = builtin_version(observation.kind, item) {
                observation.versions.push(version);
                observation.confidence = observation.confidence.max(VERSION_CONFIDENCE);
            }
            for signature in signatures.iter().filter(|s| s.path == item.path) {
                let hit = signature.evaluate(item);
                if let Some(version) = hit.version {
                    observation.versions.push(version);
                    observation.confidence = observation.confidence.max(VERSION_CONFIDENCE);
                }
                if let Some(exact) = hit.exact {
                    observation.exact_version = Some(exact);
                    observation.confidence = CHECKSUM_CONFIDENCE;
                }
            }
        }
    }
}

/// Version from the well-known files of each kind
fn builtin_version(kind: ComponentKind, evidence: &Evidence) -> Option<String> {
    let name = evidence.file_name().to_ascii_lowercase();
    let re: &Regex = match (kind, name.as_str()) {
        (ComponentKind::Plugin | ComponentKind::Theme, "readme.txt") => &README_TXT_RE,
        (ComponentKind::Theme, "style.css") => &STYLE_CSS_RE,
        (ComponentKind::Plugin | ComponentKind::Theme, n) if n.starts_with("changelog") => {
            &CHANGELOG_RE
        }
        (ComponentKind::Core, "readme.html") => &CORE_README_RE,
        (ComponentKind::Core, "feed") => &FEED_RE,
        (ComponentKind::Core, "wp-links-opml.php") => &OPML_RE,
        (ComponentKind::Timthumb, _) => &TIMTHUMB_RE,
        _ => return None,
    };

    let text = evidence.text();
    re.captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|v| !v.eq_ignore_ascii_case("trunk"))
        .map(str::to_string)
}

/// WordPress version from the homepage meta generator tag
pub fn meta_generator_version(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("meta[name='generator']").ok()?;

    for element in document.select(&selector) {
        if let Some(content) = element.value().attr("content")
            && let Some(version) = content.strip_prefix("WordPress ")
        {
            let version = version.trim();
            if !version.is_empty() {
                return Some(version.to_string());
            }
        }
    }
    None
}

/// Whether a `ver=` query value looks like a release version
///
/// Cache-busting Unix timestamps and commit hashes are not versions.
pub fn plausible_version(version: &str) -> bool {
    if version.is_empty() {
        return false;
    }

    // Unix timestamp (10 digits, starts with 1 or 2)
    if version.len() == 10
        && version.chars().all(|c| c.is_ascii_digit())
        && version.starts_with(['1', '2'])
    {
        return false;
    }

    // Git commit hash (7+ hex characters, not all digits)
    if version.len() >= 7
        && version.chars().all(|c| c.is_ascii_hexdigit())
        && !version.chars().all(|c| c.is_ascii_digit())
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> FingerprintDb {
        FingerprintDb::from_json(
            r#"{
                "core": [
                    {"path": "wp-includes/js/wp-emoji.js",
                     "checksums": {"5D41402ABC4B2A76B9719D911017C592": "4.7.1"}}
                ],
                "plugins": {
                    "akismet": [
                        {"path": "changelog.txt"},
                        {"path": "akismet.php", "pattern": "Version: ([0-9.]+)"},
                        {"path": "views/notice.php", "pattern": "akismet-notice", "version": "3.0"}
                    ]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn reject_invalid_databases() {
        assert!(FingerprintDb::from_json("{").is_err());
        assert!(
            FingerprintDb::from_json(r#"{"core": [{"path": "x", "pattern": "("}]}"#).is_err()
        );
        assert!(
            FingerprintDb::from_json(r#"{"core": [{"path": "x", "checksums": {"zz": "1"}}]}"#)
                .is_err()
        );
        assert!(FingerprintDb::from_json(r#"{"widgets": {}}"#).is_err());
        assert!(FingerprintDb::from_json(r#"{"core": [{"path": ""}]}"#).is_err());
    }

    #[test]
    fn presence_from_200_or_403() {
        let db = FingerprintDb::default();
        let matcher = FingerprintMatcher::new(&db);
        for (status, present) in [(200, true), (403, true), (404, false), (301, false), (500, false)]
        {
            let evidence = [Evidence::new("readme.txt", status, "")];
            assert_eq!(
                matcher
                    .observe(ComponentKind::Plugin, "akismet", &evidence)
                    .is_some(),
                present,
                "status {status}"
            );
        }
    }

    #[test]
    fn readme_stable_tag() {
        let db = FingerprintDb::default();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [Evidence::new(
            "readme.txt",
            200,
            "=== Akismet ===\nStable tag: trunk\nVersion: 3.1.7\n",
        )];
        let obs = matcher
            .observe(ComponentKind::Plugin, "akismet", &evidence)
            .unwrap();
        assert_eq!(obs.versions, ["3.1.7"]);
        assert_eq!(obs.confidence, VERSION_CONFIDENCE);
    }

    #[test]
    fn forbidden_presence_has_no_version() {
        let db = FingerprintDb::default();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [Evidence::new("readme.txt", 403, "Stable tag: 1.0")];
        let obs = matcher
            .observe(ComponentKind::Plugin, "akismet", &evidence)
            .unwrap();
        assert!(obs.versions.is_empty());
        assert_eq!(obs.confidence, PRESENCE_CONFIDENCE);
    }

    #[test]
    fn database_signatures_add_evidence() {
        let db = db();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [
            Evidence::new("readme.txt", 200, "Stable tag: 3.0.4"),
            Evidence::new("changelog.txt", 200, "= 3.0.4 =\n* fix\n= 3.0.3 =\n"),
            Evidence::new("akismet.php", 200, "Version: 3.0.4"),
            Evidence::new("views/notice.php", 200, "<div class='akismet-notice'>"),
        ];
        let obs = matcher
            .observe(ComponentKind::Plugin, "akismet", &evidence)
            .unwrap();
        assert_eq!(obs.versions, ["3.0.4", "3.0.4", "3.0.4", "3.0"]);
    }

    #[test]
    fn missing_files_add_nothing() {
        let db = db();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [
            Evidence::new("readme.txt", 200, "no version here"),
            Evidence::new("akismet.php", 404, "Version: 9.9"),
        ];
        let obs = matcher
            .observe(ComponentKind::Plugin, "akismet", &evidence)
            .unwrap();
        assert!(obs.versions.is_empty());
    }

    #[test]
    fn core_checksum_is_exact() {
        let db = db();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [
            Evidence::new("wp-includes/js/wp-emoji.js", 200, "hello"),
            Evidence::new("readme.html", 200, "<br /> Version 4.7"),
        ];
        let obs = matcher.observe_core(&evidence).unwrap();
        assert_eq!(obs.exact_version.as_deref(), Some("4.7.1"));
        assert_eq!(obs.versions, ["4.7"]);
        assert_eq!(obs.confidence, CHECKSUM_CONFIDENCE);
    }

    #[test]
    fn core_sources() {
        let db = FingerprintDb::default();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [
            Evidence::new("feed/", 200, "<generator>https://wordpress.org/?v=6.4.2</generator>"),
            Evidence::new("wp-links-opml.php", 200, r#"<!-- generator="WordPress/6.4.2" -->"#),
        ];
        let obs = matcher.observe_core(&evidence).unwrap();
        assert_eq!(obs.versions, ["6.4.2", "6.4.2"]);
        assert!(matcher.observe_core(&[Evidence::new("feed/", 404, "")]).is_none());
    }

    #[test]
    fn excluded_bodies_are_absent() {
        let db = FingerprintDb::default();
        let soft_404 = Regex::new("(?i)page not found").unwrap();
        let matcher = FingerprintMatcher::new(&db).exclude_body(Some(&soft_404));
        let evidence = [Evidence::new("readme.txt", 200, "<h1>Page not found</h1>")];
        assert!(matcher
            .observe(ComponentKind::Plugin, "x", &evidence)
            .is_none());
    }

    #[test]
    fn timthumb_version() {
        let db = FingerprintDb::default();
        let matcher = FingerprintMatcher::new(&db);
        let evidence = [Evidence::new(
            "wp-content/themes/x/timthumb.php",
            400,
            "A TimThumb error has occured<br />No image specified<br />TimThumb version : 2.8.13</pre>",
        )];
        let obs = matcher
            .observe(ComponentKind::Timthumb, "wp-content/themes/x/timthumb.php", &evidence)
            .unwrap();
        assert_eq!(obs.versions, ["2.8.13"]);
    }

    #[test]
    fn meta_generator() {
        let html = r#"<html><head><meta name="generator" content="WordPress 6.4.2" /></head></html>"#;
        assert_eq!(meta_generator_version(html).as_deref(), Some("6.4.2"));
        assert_eq!(meta_generator_version("<html></html>"), None);
        let other = r#"<meta name="generator" content="Drupal 10">"#;
        assert_eq!(meta_generator_version(other), None);
    }

    #[test]
    fn plausible_versions() {
        assert!(plausible_version("1.2.3"));
        assert!(plausible_version("7.0-alpha"));
        assert!(plausible_version("20200121"));
        assert!(!plausible_version("1748271784"));
        assert!(!plausible_version("569ab5664387d06c16a234c9771d3d57fb15720a"));
        assert!(!plausible_version("abcdef1"));
        assert!(!plausible_version(""));
    }
}
