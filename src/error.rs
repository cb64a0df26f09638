//! Error types for wordpress-recon

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a WordPress reconnaissance run
///
/// Everything except [`Error::HttpRequest`] and [`Error::NoUsernames`] is a
/// configuration error: it is raised before any concurrent pass starts and
/// aborts the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid URL provided
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to create HTTP client
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),

    /// HTTP request failed after all retries
    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    /// Target did not answer the first request
    #[error("the WordPress URL supplied '{0}' seems to be down")]
    TargetOffline(String),

    /// Target redirects and following was not accepted
    #[error("the remote host tried to redirect to {0} (use --follow-redirection)")]
    RedirectionNotFollowed(String),

    /// Target answers 401 and no credentials were configured
    #[error("basic authentication is required, provide it with --basic-auth <login:password>")]
    BasicAuthRequired,

    /// Site does not appear to be WordPress
    #[error("the remote website is up, but does not seem to be running WordPress")]
    NotWordPress,

    /// Content directory could not be detected
    #[error("the wp-content directory has not been found, supply it with --wp-content-dir")]
    ContentDirNotFound,

    /// Plugins directory is missing and the run was not confirmed
    #[error("the plugins directory '{0}' does not exist (use --yes to continue anyway)")]
    PluginsDirMissing(String),

    /// No knowledge base was configured
    #[error("no vulnerability knowledge base configured, supply it with --knowledge-base")]
    KnowledgeBaseMissing,

    /// Passwords were given but no username was supplied or enumerated
    #[error("no usernames to test, supply them with --username")]
    NoUsernames,

    /// Knowledge base failed validation
    #[error("invalid knowledge base: {0}")]
    InvalidKnowledgeBase(String),

    /// Fingerprint database failed validation
    #[error("invalid fingerprint database: {0}")]
    InvalidFingerprints(String),

    /// Invalid version predicate in a knowledge base record
    #[error("invalid version predicate: '{0}'")]
    InvalidPredicate(String),

    /// Invalid regular expression in configuration
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data file could not be read
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Invalid output format specified
    #[error("invalid output format: '{0}' (valid: human, json, none)")]
    InvalidOutputFormat(String),

    /// Invalid output sort order specified
    #[error("invalid output sort: '{0}' (valid: type, name, status)")]
    InvalidOutputSort(String),

    /// Output operation failed
    #[error("output failed: {0}")]
    OutputFailed(#[source] std::io::Error),

    /// JSON (de)serialization failed
    #[error("JSON serialization failed")]
    SerializationFailed(#[from] serde_json::Error),
}
