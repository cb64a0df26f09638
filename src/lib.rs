//! WordPress Recon - WordPress fingerprinting and credential testing
//!
//! Probes a WordPress site over HTTP to identify its core version, plugins,
//! themes, TimThumb scripts and users, cross-references them against a
//! vulnerability knowledge base and optionally tests login credentials.
//!
//! # Example
//!
//! ```no_run
//! use wordpress_recon::{ScanConfig, ScanInputs, Scanner};
//!
//! #[tokio::main]
//! async fn main() -> wordpress_recon::Result<()> {
//!     let mut config = ScanConfig::default();
//!     config.data.knowledge_base = Some("data/vulnerabilities.json".into());
//!     let inputs = ScanInputs::load(&config.data, &config.enumerate)?;
//!     let scanner = Scanner::builder("https://example.com")
//!         .config(config)
//!         .inputs(inputs)
//!         .build()?;
//!     let report = scanner.scan().await?;
//!     for component in &report.components {
//!         println!("{} {} {:?}", component.kind, component.slug, component.version);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod data;
pub mod enumerate;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod scanner;
pub mod target;
pub mod vuln;

pub use config::{DataPaths, EnumerateConfig, ScanConfig};
pub use credentials::{CredentialTester, LoginOutcome, classify_login};
pub use data::Candidate;
pub use enumerate::{Enumerator, NoProgress, ProbeOutcome, ProgressObserver, StopSignal};
pub use error::{Error, Result};
pub use fingerprint::{Evidence, FingerprintDb, FingerprintMatcher, Signature};
pub use http::{BasicAuth, HttpClient, HttpConfig};
pub use output::{OutputConfig, OutputFormat, OutputSort, output_report};
pub use reconcile::{Reconciled, reconcile};
pub use report::{
    Aggregator, Component, ComponentKind, ComponentObservation, Credential, CredentialStatus,
    PassStats, ScanReport,
};
pub use scanner::{ScanInputs, Scanner, ScannerBuilder};
pub use target::{RedirectionProbe, SiteFindings, Target, WordPressProbe, XmlRpcProbe};
pub use vuln::{KnowledgeBase, VersionPredicate, VulnerabilityMatch, VulnerabilityRecord};
