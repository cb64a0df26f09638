//! Credential testing against `wp-login.php`
//!
//! Every (username, password) pair is attempted through a bounded pool.
//! Once a username has a valid password, its remaining pairs are no longer
//! dispatched; other usernames continue.

use crate::enumerate::{NoProgress, ProgressObserver, StopSignal};
use crate::error::Result;
use crate::http::{DEFAULT_MAX_ATTEMPTS, ProbeResponse};
use crate::report::{Aggregator, ComponentKind, Credential, CredentialStatus};
use crate::target::Target;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{LazyLock, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

/// Plugins that lock accounts after failed logins, with the login page
/// marker each one leaves
const LOGIN_PROTECTION_PLUGINS: &[(&str, Option<&str>)] = &[
    ("login-lockdown", Some(r"(?i)login\s*lockdown")),
    ("login-lock", Some(r"(?i)LOGIN\s*LOCK\s*\d+")),
    ("better-wp-security", None),
    ("simple-login-lockdown", None),
    ("login-security-solution", None),
    ("limit-login-attempts", None),
    ("bluetrait-event-viewer", None),
];

static LOGIN_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)login_error").unwrap());

/// Outcome of a single login response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Valid,
    Invalid,
    /// Server error, worth another attempt
    Retry,
    /// Anything else
    Error,
}

/// Classify a login response
///
/// Valid only when the site redirects exactly to `redirect_to`.
pub fn classify_login(response: &ProbeResponse, redirect_to: &str) -> LoginOutcome {
    if response.status == 302 && response.header("location") == Some(redirect_to) {
        LoginOutcome::Valid
    } else if LOGIN_ERROR_RE.is_match(&response.text()) {
        LoginOutcome::Invalid
    } else if (500..600).contains(&response.status) {
        LoginOutcome::Retry
    } else {
        LoginOutcome::Error
    }
}

/// Detect a login protection plugin
///
/// Plugins already detected by the scan are checked first, then the login
/// page markers, then each plugin's readme.
pub async fn detect_login_protection(target: &Target, aggregator: &Aggregator) -> Option<String> {
    let detected = aggregator.slugs(ComponentKind::Plugin);
    if let Some((slug, _)) = LOGIN_PROTECTION_PLUGINS
        .iter()
        .find(|(slug, _)| detected.iter().any(|d| d == slug))
    {
        return Some(slug.to_string());
    }

    let login_page = match target.login_url() {
        Ok(url) => target.http().get(&url).await.ok().map(|r| r.text().into_owned()),
        Err(_) => None,
    };
    if let Some(body) = login_page {
        for (slug, marker) in LOGIN_PROTECTION_PLUGINS {
            if let Some(marker) = marker
                && let Ok(re) = Regex::new(marker)
                && re.is_match(&body)
            {
                return Some(slug.to_string());
            }
        }
    }

    for (slug, _) in LOGIN_PROTECTION_PLUGINS {
        let Ok(url) = target.content_url(&format!("plugins/{}/readme.txt", slug)) else {
            continue;
        };
        if let Ok(response) = target.http().get(&url).await
            && response.status == 200
        {
            return Some(slug.to_string());
        }
    }

    None
}

/// Concurrent login attempts against one target
pub struct CredentialTester<'a> {
    target: &'a Target,
    observer: &'a dyn ProgressObserver,
    stop: StopSignal,
    threads: usize,
    verbose: bool,
}

impl<'a> CredentialTester<'a> {
    pub fn new(target: &'a Target) -> Self {
        Self {
            target,
            observer: &NoProgress,
            stop: StopSignal::default(),
            threads: 1,
            verbose: false,
        }
    }

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

    /// Report every rejected attempt
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Try every pair and return the terminal credentials
    pub async fn run(&self, usernames: &[String], passwords: &[String]) -> Result<Vec<Credential>> {
        let login_url = self.target.login_url()?;
        let redirect_to = self.target.url_for("wp-admin/")?.to_string();
        let found: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let is_found = |username: &str| {
            found
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(username)
        };

        let total = usernames.len() * passwords.len();
        info!(usernames = usernames.len(), passwords = passwords.len(), "credential testing started");
        self.observer.pass_started(ComponentKind::User, total);

        let pairs = usernames
            .iter()
            .flat_map(|u| passwords.iter().map(move |p| (u, p)));

        let credentials: Vec<Credential> = stream::iter(pairs)
            .take_while(|_| futures::future::ready(!self.stop.is_stopped()))
            .filter(|(username, _)| futures::future::ready(!is_found(username.as_str())))
            .map(|(username, password)| {
                let login_url = &login_url;
                let redirect_to = redirect_to.as_str();
                let found = &found;
                async move {
                    let credential = self
                        .attempt(login_url, redirect_to, username, password)
                        .await;
                    if credential.status == CredentialStatus::Valid {
                        found
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(username.clone());
                    }
                    credential
                }
            })
            .buffer_unordered(self.threads)
            .inspect(|_| self.observer.probe_finished(ComponentKind::User))
            .collect()
            .await;

        self.observer.pass_finished(ComponentKind::User);
        Ok(credentials)
    }

    async fn attempt(
        &self,
        login_url: &Url,
        redirect_to: &str,
        username: &str,
        password: &str,
    ) -> Credential {
        let mut credential = Credential::new(username, password);
        let form = [
            ("log", username),
            ("pwd", password),
            ("wp-submit", "Log In"),
            ("redirect_to", redirect_to),
        ];

        for attempt in 1..=DEFAULT_MAX_ATTEMPTS {
            let outcome = match self.target.http().post_form(login_url, &form).await {
                Ok(response) => classify_login(&response, redirect_to),
                Err(e) => {
                    debug!(username, attempt, error = %e, "login request failed");
                    LoginOutcome::Retry
                }
            };

            credential.status = match outcome {
                LoginOutcome::Valid => {
                    info!(username, "valid credentials found");
                    CredentialStatus::Valid
                }
                LoginOutcome::Invalid => {
                    if self.verbose {
                        info!(username, password, "invalid login");
                        self.observer.login_failed(username, password);
                    }
                    CredentialStatus::Invalid
                }
                LoginOutcome::Retry if attempt < DEFAULT_MAX_ATTEMPTS => continue,
                LoginOutcome::Retry | LoginOutcome::Error => {
                    warn!(username, attempt, "login attempt errored");
                    CredentialStatus::Error
                }
            };
            break;
        }

        credential
    }
}
