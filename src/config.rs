//! Scan configuration
//!
//! Every option has a default; a TOML file may set any subset of them and
//! command-line flags override the file.
//!
//! ```toml
//! threads = 10
//! follow_redirection = true
//!
//! [enumerate]
//! plugins = true
//! only_vulnerable = true
//!
//! [data]
//! knowledge_base = "data/vulnerabilities.json"
//! plugins = "data/plugins.txt"
//! ```

use crate::enumerate::DEFAULT_USER_IDS;
use crate::error::{Error, Result};
use crate::http::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
    HttpConfig,
};
use regex::Regex;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Probes in flight by default
pub const DEFAULT_THREADS: usize = 4;

/// Which aggressive passes run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnumerateConfig {
    pub plugins: bool,
    pub themes: bool,
    pub timthumbs: bool,
    pub users: bool,
    /// Only report plugins and themes with known vulnerabilities
    pub only_vulnerable: bool,
    /// First author ID probed
    pub user_id_start: u32,
    /// Last author ID probed
    pub user_id_end: u32,
}

impl Default for EnumerateConfig {
    fn default() -> Self {
        Self {
            plugins: false,
            themes: false,
            timthumbs: false,
            users: false,
            only_vulnerable: false,
            user_id_start: *DEFAULT_USER_IDS.start(),
            user_id_end: *DEFAULT_USER_IDS.end(),
        }
    }
}

impl EnumerateConfig {
    pub fn user_ids(&self) -> RangeInclusive<u32> {
        self.user_id_start..=self.user_id_end
    }
}

/// Data file locations
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataPaths {
    pub fingerprints: Option<PathBuf>,
    pub knowledge_base: Option<PathBuf>,
    pub plugins: Option<PathBuf>,
    pub themes: Option<PathBuf>,
    pub timthumbs: Option<PathBuf>,
    pub passwords: Option<PathBuf>,
    /// Malicious URL regexes, one per line
    pub malwares: Option<PathBuf>,
}

/// Complete scan configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Maximum concurrent requests
    pub threads: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Proxy URL (`http://`, `https://` or `socks5://`)
    pub proxy: Option<String>,
    /// Basic auth as `login:password`
    pub basic_auth: Option<String>,
    pub max_redirects: usize,
    /// Follow a homepage redirection instead of failing
    pub follow_redirection: bool,
    /// Scan even if the site does not look like WordPress
    pub force: bool,
    /// Accept every condition that would otherwise need confirmation
    pub confirmed: bool,
    /// Allow private/internal addresses
    pub allow_private: bool,
    /// Content directory, detected when absent
    pub wp_content_dir: Option<String>,
    /// Regex on slugs; matching candidates are not probed
    pub exclude_content: Option<String>,
    /// Regex on response bodies; matching responses count as absent
    pub exclude_body: Option<String>,
    pub enumerate: EnumerateConfig,
    /// Usernames for credential testing, enumerated users when empty
    pub usernames: Vec<String>,
    /// Report each rejected login attempt
    pub verbose: bool,
    pub data: DataPaths,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            basic_auth: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            follow_redirection: false,
            force: false,
            confirmed: false,
            allow_private: false,
            wp_content_dir: None,
            exclude_content: None,
            exclude_body: None,
            enumerate: EnumerateConfig::default(),
            usernames: Vec::new(),
            verbose: false,
            data: DataPaths::default(),
        }
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|source| Error::InvalidPattern {
                pattern: p.to_string(),
                source,
            })
        })
        .transpose()
}

impl ScanConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check values that cannot be expressed in the types
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidConfig("threads must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig("timeout must be at least 1 second".into()));
        }
        if self.enumerate.user_id_start > self.enumerate.user_id_end {
            return Err(Error::InvalidConfig(format!(
                "empty user ID range {}-{}",
                self.enumerate.user_id_start, self.enumerate.user_id_end
            )));
        }
        self.exclude_content_regex()?;
        self.exclude_body_regex()?;
        self.http_config()?;
        Ok(())
    }

    pub fn exclude_content_regex(&self) -> Result<Option<Regex>> {
        compile(self.exclude_content.as_deref())
    }

    pub fn exclude_body_regex(&self) -> Result<Option<Regex>> {
        compile(self.exclude_body.as_deref())
    }

    /// Transport policy for the HTTP client
    pub fn http_config(&self) -> Result<HttpConfig> {
        Ok(HttpConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            proxy: self.proxy.clone(),
            basic_auth: self.basic_auth.as_deref().map(str::parse).transpose()?,
        })
    }
}
