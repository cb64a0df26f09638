//! WordPress website scanner
//!
//! Resolves the target, runs the detection passes and the optional
//! credential test, and builds the [`ScanReport`].

use crate::config::{DataPaths, EnumerateConfig, ScanConfig};
use crate::credentials::{CredentialTester, detect_login_protection};
use crate::data::{self, Candidate};
use crate::enumerate::{Enumerator, NoProgress, ProgressObserver, StopSignal};
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintDb;
use crate::http::HttpClient;
use crate::report::{Aggregator, ComponentKind, ScanReport};
use crate::target::{RedirectionProbe, Target, WordPressProbe, parse_target_url};
use crate::vuln::KnowledgeBase;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Reference data a scan matches against
///
/// The default value holds an empty knowledge base; pass it to
/// [`ScannerBuilder::inputs`] to scan without vulnerability lookup.
#[derive(Debug, Clone, Default)]
pub struct ScanInputs {
    pub fingerprints: FingerprintDb,
    pub knowledge_base: KnowledgeBase,
    pub plugins: Vec<Candidate>,
    pub themes: Vec<Candidate>,
    /// TimThumb paths, relative to the content directory
    pub timthumbs: Vec<Candidate>,
    pub passwords: Vec<String>,
    /// Homepage script/iframe sources known to be malicious
    pub malwares: Vec<Regex>,
}

impl ScanInputs {
    /// Load the configured data files
    ///
    /// The knowledge base is mandatory. Wordlists are only read for the
    /// passes that are enabled.
    pub fn load(paths: &DataPaths, enumerate: &EnumerateConfig) -> Result<Self> {
        let wordlist = |enabled: bool, path: &Option<std::path::PathBuf>| match path {
            Some(p) if enabled => data::load_wordlist(p),
            _ => Ok(Vec::new()),
        };
        let knowledge_base = paths
            .knowledge_base
            .as_deref()
            .ok_or(Error::KnowledgeBaseMissing)?;

        Ok(Self {
            fingerprints: paths
                .fingerprints
                .as_deref()
                .map(data::load_fingerprints)
                .transpose()?
                .unwrap_or_default(),
            knowledge_base: data::load_knowledge_base(knowledge_base)?,
            plugins: wordlist(enumerate.plugins, &paths.plugins)?,
            themes: wordlist(enumerate.themes, &paths.themes)?,
            timthumbs: wordlist(enumerate.timthumbs, &paths.timthumbs)?,
            passwords: paths
                .passwords
                .as_deref()
                .map(data::load_passwords)
                .transpose()?
                .unwrap_or_default(),
            malwares: paths
                .malwares
                .as_deref()
                .map(data::load_malwares)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// WordPress scanner
pub struct Scanner {
    url: Url,
    http: HttpClient,
    config: ScanConfig,
    inputs: ScanInputs,
    exclude_content: Option<Regex>,
    exclude_body: Option<Regex>,
    stop: StopSignal,
    observer: Arc<dyn ProgressObserver>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("url", &self.url.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a Scanner with options
pub struct ScannerBuilder {
    url: String,
    config: ScanConfig,
    inputs: ScanInputs,
    stop: StopSignal,
    observer: Arc<dyn ProgressObserver>,
}

impl std::fmt::Debug for ScannerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerBuilder")
            .field("url", &self.url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScannerBuilder {
    /// Create a new builder for the given URL or domain
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            config: ScanConfig::default(),
            inputs: ScanInputs::default(),
            stop: StopSignal::default(),
            observer: Arc::new(NoProgress),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Allow scanning private/internal IP addresses (localhost, 192.168.x.x, etc.)
    ///
    /// By default, SSRF protection blocks requests to internal networks.
    /// Enable this to scan local WordPress installations.
    pub fn allow_private(mut self, allow: bool) -> Self {
        self.config.allow_private = allow;
        self
    }

    /// Maximum concurrent requests
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Fingerprints, knowledge base, wordlists and passwords
    pub fn inputs(mut self, inputs: ScanInputs) -> Self {
        self.inputs = inputs;
        self
    }

    /// Signal checked before every dispatch
    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Build the Scanner with the configured options
    pub fn build(self) -> Result<Scanner> {
        self.config.validate()?;
        let url = parse_target_url(&self.url, self.config.allow_private)?;
        let http = HttpClient::new(&self.config.http_config()?)?;

        Ok(Scanner {
            url,
            http,
            exclude_content: self.config.exclude_content_regex()?,
            exclude_body: self.config.exclude_body_regex()?,
            config: self.config,
            inputs: self.inputs,
            stop: self.stop,
            observer: self.observer,
        })
    }
}

impl Scanner {
    /// Create a new scanner for the given URL or domain
    ///
    /// Uses default settings with SSRF protection enabled.
    /// For more options, use [`Scanner::builder()`].
    pub fn new(url: &str) -> Result<Self> {
        ScannerBuilder::new(url).build()
    }

    /// Create a builder for configuring scanner options
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wordpress_recon::Scanner;
    ///
    /// let scanner = Scanner::builder("localhost:8080")
    ///     .allow_private(true)
    ///     .threads(8)
    ///     .build()?;
    /// # Ok::<(), wordpress_recon::Error>(())
    /// ```
    pub fn builder(url: &str) -> ScannerBuilder {
        ScannerBuilder::new(url)
    }

    /// Normalized target URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Scan the WordPress site
    ///
    /// Every configuration error surfaces before the first concurrent pass.
    pub async fn scan(&self) -> Result<ScanReport> {
        if self.inputs.knowledge_base.is_empty() {
            warn!("knowledge base is empty, no vulnerability will be reported");
        }
        let mut target = self.resolve_target().await?;

        if target.has_basic_auth() {
            return Err(Error::BasicAuthRequired);
        }

        if !target.is_wordpress().await {
            if !self.config.force {
                return Err(Error::NotWordPress);
            }
            warn!("site does not look like WordPress, scanning anyway");
        }

        target.resolve_content_dir(self.config.wp_content_dir.as_deref())?;

        if !target.plugins_dir_exists().await {
            if !self.config.confirmed {
                return Err(Error::PluginsDirMissing(target.plugins_dir_url()));
            }
            warn!(dir = %target.plugins_dir_url(), "plugins directory not found, continuing");
        }

        target.detect_multisite().await;
        let mut findings = target.inspect(&self.inputs.malwares).await;
        if !findings.malwares.is_empty() {
            warn!(count = findings.malwares.len(), "malware found on the homepage");
        }
        info!(url = %target.url(), content_dir = target.content_dir(), multisite = target.is_multisite(), "target resolved");

        let aggregator = Aggregator::new();
        self.enumerate(&target, &aggregator).await;

        findings.login_protection = detect_login_protection(&target, &aggregator).await;
        if let Some(plugin) = &findings.login_protection {
            warn!(plugin = %plugin, "login protection detected");
        }

        if !self.inputs.passwords.is_empty() {
            self.test_credentials(&target, &aggregator, findings.login_protection.as_deref())
                .await?;
        }

        let interrupted = self.stop.is_stopped();
        let report = aggregator.into_report(
            target.url().as_str(),
            findings,
            &self.inputs.knowledge_base,
            interrupted,
        );
        info!(
            components = report.components.len(),
            vulnerable = report.vulnerable_count(),
            interrupted,
            "scan finished"
        );
        Ok(report)
    }

    /// Connect to the target, following homepage redirections when allowed
    async fn resolve_target(&self) -> Result<Target> {
        let mut url = self.url.clone();
        let mut hops = 0;

        loop {
            let target = Target::connect(self.http.clone(), url.clone()).await?;
            let Some(location) = target.redirection() else {
                return Ok(target);
            };

            let next = url
                .join(location)
                .map_err(|e| Error::InvalidUrl(e.to_string()))?;
            if !self.config.follow_redirection || hops >= self.config.max_redirects {
                return Err(Error::RedirectionNotFollowed(next.to_string()));
            }

            info!(from = %url, to = %next, "following redirection");
            url = parse_target_url(next.as_str(), self.config.allow_private)?;
            hops += 1;
        }
    }

    async fn enumerate(&self, target: &Target, aggregator: &Aggregator) {
        let enumerator = Enumerator::new(target, &self.inputs.fingerprints, aggregator)
            .threads(self.config.threads)
            .stop_signal(self.stop.clone())
            .observer(self.observer.as_ref())
            .exclude_content(self.exclude_content.as_ref())
            .exclude_body(self.exclude_body.as_ref());
        let options = &self.config.enumerate;

        enumerator.passive_core().await;
        let main_theme = enumerator.main_theme().await;
        enumerator.passive_plugins();
        enumerator.passive_themes();

        if options.only_vulnerable {
            aggregator.only_vulnerable(ComponentKind::Plugin);
            aggregator.only_vulnerable(ComponentKind::Theme);
        }

        let passes = [
            (options.plugins, ComponentKind::Plugin, &self.inputs.plugins),
            (options.themes, ComponentKind::Theme, &self.inputs.themes),
        ];
        for (enabled, kind, candidates) in passes {
            if !enabled {
                continue;
            }
            if candidates.is_empty() {
                warn!(%kind, "no wordlist, skipping aggressive pass");
                continue;
            }
            enumerator.aggressive(kind, candidates).await;
        }

        if options.timthumbs {
            enumerator
                .timthumbs(&self.inputs.timthumbs, main_theme.as_deref())
                .await;
        }

        if options.users || self.needs_usernames() {
            enumerator.users(options.user_ids()).await;
        }
    }

    /// Credential testing without supplied usernames falls back to enumerated users
    fn needs_usernames(&self) -> bool {
        !self.inputs.passwords.is_empty() && self.config.usernames.is_empty()
    }

    async fn test_credentials(
        &self,
        target: &Target,
        aggregator: &Aggregator,
        login_protection: Option<&str>,
    ) -> Result<()> {
        if let Some(plugin) = login_protection
            && !self.config.confirmed
        {
            warn!(plugin, "login protection active, skipping credential testing");
            return Ok(());
        }

        let usernames = if self.config.usernames.is_empty() {
            aggregator.slugs(ComponentKind::User)
        } else {
            self.config.usernames.clone()
        };
        if usernames.is_empty() {
            return Err(Error::NoUsernames);
        }

        let credentials = CredentialTester::new(target)
            .threads(self.config.threads)
            .stop_signal(self.stop.clone())
            .observer(self.observer.as_ref())
            .verbose(self.config.verbose)
            .run(&usernames, &self.inputs.passwords)
            .await?;
        aggregator.record_credentials(credentials);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_invalid_url() {
        let scanner = Scanner::new("not a url");
        assert!(scanner.is_err());
    }

    #[test]
    fn reject_localhost() {
        let result = Scanner::new("http://localhost");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("localhost"));
    }

    #[test]
    fn allow_private_target() {
        let scanner = Scanner::builder("127.0.0.1:8080")
            .allow_private(true)
            .build()
            .unwrap();
        assert_eq!(scanner.url().as_str(), "https://127.0.0.1:8080/");
    }

    #[test]
    fn reject_invalid_config() {
        let result = Scanner::builder("127.0.0.1").allow_private(true).threads(0).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let config = ScanConfig {
            allow_private: true,
            exclude_body: Some("[".into()),
            ..ScanConfig::default()
        };
        let result = Scanner::builder("127.0.0.1").config(config).build();
        assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    }

    fn knowledge_base_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[{{"id": "1", "kind": "plugin", "slug": "akismet", "title": "XSS", "affected": "<3.1.5"}}]"#
        )
        .unwrap();
        file
    }

    #[test]
    fn inputs_skip_disabled_wordlists() {
        let kb = knowledge_base_file();
        let paths = DataPaths {
            knowledge_base: Some(kb.path().to_path_buf()),
            plugins: Some("/nonexistent/plugins.txt".into()),
            ..DataPaths::default()
        };
        let inputs = ScanInputs::load(&paths, &EnumerateConfig::default()).unwrap();
        assert!(inputs.plugins.is_empty());

        let enabled = EnumerateConfig {
            plugins: true,
            ..EnumerateConfig::default()
        };
        assert!(ScanInputs::load(&paths, &enabled).is_err());
    }

    #[test]
    fn inputs_require_knowledge_base() {
        let result = ScanInputs::load(&DataPaths::default(), &EnumerateConfig::default());
        assert!(matches!(result, Err(Error::KnowledgeBaseMissing)));

        let kb = knowledge_base_file();
        let paths = DataPaths {
            knowledge_base: Some(kb.path().to_path_buf()),
            ..DataPaths::default()
        };
        let inputs = ScanInputs::load(&paths, &EnumerateConfig::default()).unwrap();
        assert_eq!(inputs.knowledge_base.len(), 1);
        assert!(inputs.malwares.is_empty());
    }
}
