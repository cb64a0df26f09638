//! Scan target
//!
//! A [`Target`] is the resolved identity of the scanned site together with a
//! snapshot of its homepage. Site inspection behaviors are exposed as small
//! capability traits implemented by the target.

use crate::error::{Error, Result};
use crate::http::{HttpClient, ProbeResponse};
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

/// Allowed URL schemes
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Content directory of a stock install
pub const DEFAULT_CONTENT_DIR: &str = "wp-content";

const LOGIN_PATH: &str = "wp-login.php";
const XMLRPC_PATH: &str = "xmlrpc.php";
const SIGNUP_PATH: &str = "wp-signup.php";
const REGISTER_PATH: &str = "wp-login.php?action=register";
const ROBOTS_PATH: &str = "robots.txt";
const README_PATH: &str = "readme.html";
const FPD_PATH: &str = "wp-includes/rss-functions.php";
const SEARCH_REPLACE_DB_PATH: &str = "searchreplacedb2.php";

/// Body marker of the XML-RPC endpoint
const XMLRPC_MARKER: &str = "xml-rpc server accepts post requests only";

/// Common backup names of wp-config.php
const CONFIG_BACKUPS: &[&str] = &[
    "wp-config.php~",
    "%23wp-config.php%23",
    "wp-config.php.save",
    "wp-config.php.swp",
    "wp-config.php.swo",
    "wp-config.php_bak",
    "wp-config.bak",
    "wp-config.php.bak",
    "wp-config.save",
    "wp-config.old",
    "wp-config.php.old",
    "wp-config.php.orig",
    "wp-config.orig",
    "wp-config.php.original",
    "wp-config.original",
    "wp-config.txt",
];

/// Response headers that carry nothing worth reporting
const KNOWN_HEADERS: &[&str] = &[
    "accept-ranges",
    "age",
    "cache-control",
    "connection",
    "content-encoding",
    "content-length",
    "content-type",
    "date",
    "etag",
    "expires",
    "keep-alive",
    "last-modified",
    "link",
    "location",
    "pragma",
    "set-cookie",
    "transfer-encoding",
    "vary",
    "x-pingback",
];

/// robots.txt entries present on every install
const DEFAULT_ROBOTS_ENTRIES: &[&str] = &["/", "/wp-admin/", "/wp-admin/admin-ajax.php"];

static WORDPRESS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)wordpress").unwrap());
static FATAL_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Fatal error").unwrap());
static DEBUG_LOG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]+\] PHP (?:Warning|Error|Notice|Fatal error|Parse error):").unwrap());
static DEFINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)define").unwrap());
static HTML_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<\s?html").unwrap());
static ROBOTS_RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*(?:dis)?allow:\s*(\S+)").unwrap());
static CONTENT_DIR_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/wp-content/(?:themes|plugins)/").unwrap());

/// Regex finding a `<script>` or `<iframe>` whose source matches `url_regex`
///
/// The first group captures the whole source URL.
pub fn malware_pattern(url_regex: &str) -> Result<Regex> {
    let pattern = format!(r#"(?i)<(?:script|iframe)[^>]*\ssrc\s*=\s*["']((?:{url_regex})[^"']*)["']"#);
    Regex::new(&pattern).map_err(|source| Error::InvalidPattern {
        pattern: url_regex.to_string(),
        source,
    })
}

/// Normalize and validate a target URL
///
/// Adds `https://` when no scheme is given and a trailing slash to the
/// path. Unless `allow_private` is set, hosts resolving to internal
/// addresses are rejected (SSRF protection).
pub fn parse_target_url(url: &str, allow_private: bool) -> Result<Url> {
    let url_with_scheme = if !url.contains("://") {
        format!("https://{}", url)
    } else {
        url.to_string()
    };

    let mut base_url =
        Url::parse(&url_with_scheme).map_err(|e| Error::InvalidUrl(e.to_string()))?;

    if !ALLOWED_SCHEMES.contains(&base_url.scheme()) {
        return Err(Error::InvalidUrl(format!(
            "scheme '{}' not allowed (use http or https)",
            base_url.scheme()
        )));
    }

    if !allow_private {
        validate_host(&base_url)?;
    }

    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }
    base_url.set_query(None);
    base_url.set_fragment(None);

    Ok(base_url)
}

/// Validate that the host is not an internal/private address (SSRF protection)
fn validate_host(url: &Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("missing host".to_string()))?;

    if host == "localhost" || host.ends_with(".localhost") {
        return Err(Error::InvalidUrl("localhost not allowed".to_string()));
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let socket_addr = format!("{}:{}", host.trim_matches(['[', ']']), port);

    if let Ok(addrs) = socket_addr.to_socket_addrs() {
        for addr in addrs {
            if is_internal_ip(addr.ip()) {
                return Err(Error::InvalidUrl(format!(
                    "internal/private IP address not allowed: {}",
                    addr.ip()
                )));
            }
        }
    }

    Ok(())
}

/// Check if an IP address is internal/private (RFC 1918, link-local, loopback, etc.)
fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()                      // 127.0.0.0/8
                || ipv4.is_private()                // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || ipv4.is_link_local()             // 169.254.0.0/16
                || ipv4.is_broadcast()              // 255.255.255.255
                || ipv4.is_unspecified()            // 0.0.0.0
                || ipv4.octets()[0] == 100          // Shared address space 100.64.0.0/10
                    && ipv4.octets()[1] >= 64
                    && ipv4.octets()[1] <= 127
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local addresses (fc00::/7)
                || (ipv6.segments()[0] & 0xfe00) == 0xfc00
                // Link-local (fe80::/10)
                || (ipv6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Site-level observations that are not components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteFindings {
    /// Interesting (non-standard) response headers of the homepage
    pub interesting_headers: Vec<(String, String)>,
    /// robots.txt URL when present
    pub robots_url: Option<String>,
    /// Non-default robots.txt entries
    pub robots_entries: Vec<String>,
    /// Exposed readme.html URL
    pub readme_url: Option<String>,
    /// URL disclosing the full installation path
    pub full_path_disclosure_url: Option<String>,
    /// Exposed debug log URL
    pub debug_log_url: Option<String>,
    /// Readable wp-config.php backups
    pub config_backups: Vec<String>,
    /// Exposed searchreplacedb2.php URL
    pub search_replace_db_url: Option<String>,
    /// XML-RPC endpoint advertised by the pingback header
    pub xml_rpc_url: Option<String>,
    pub multisite: bool,
    pub registration_enabled: bool,
    /// Detected login protection plugin
    pub login_protection: Option<String>,
    /// Malicious script/iframe sources of the homepage
    pub malwares: Vec<String>,
}

/// Observes 301/302 redirections
pub trait RedirectionProbe {
    /// Where the homepage redirected to when the target was connected
    fn redirection(&self) -> Option<&str>;
}

/// XML-RPC interface discovery
pub trait XmlRpcProbe {
    /// XML-RPC URL from the homepage `X-Pingback` header
    fn xml_rpc_url(&self) -> Option<&str>;

    fn has_xml_rpc(&self) -> bool {
        self.xml_rpc_url().is_some()
    }
}

/// WordPress fingerprinting of the site as a whole
#[async_trait]
pub trait WordPressProbe {
    /// Whether the remote site looks like WordPress
    async fn is_wordpress(&self) -> bool;
}

/// The scanned site and its homepage snapshot
#[derive(Debug, Clone)]
pub struct Target {
    http: HttpClient,
    url: Url,
    status: u16,
    headers: HeaderMap,
    homepage: String,
    content_dir: Option<String>,
    multisite: bool,
}

impl Target {
    /// Fetch the homepage and capture the snapshot
    ///
    /// A target that does not answer at all is offline.
    pub async fn connect(http: HttpClient, url: Url) -> Result<Self> {
        let response = http
            .get(&url)
            .await
            .map_err(|_| Error::TargetOffline(url.to_string()))?;

        Ok(Self {
            http,
            url,
            status: response.status,
            homepage: response.text().into_owned(),
            headers: response.headers,
            content_dir: None,
            multisite: false,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    /// Homepage answered 401
    pub fn has_basic_auth(&self) -> bool {
        self.status == 401
    }

    pub fn is_multisite(&self) -> bool {
        self.multisite
    }

    /// Resolved content directory, relative to the base URL
    pub fn content_dir(&self) -> &str {
        self.content_dir.as_deref().unwrap_or(DEFAULT_CONTENT_DIR)
    }

    /// Resolve a path relative to the base URL
    pub fn url_for(&self, path: &str) -> Result<Url> {
        self.url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidUrl(e.to_string()))
    }

    /// URL of the login form
    pub fn login_url(&self) -> Result<Url> {
        self.url_for(LOGIN_PATH)
    }

    /// URL of a path inside the content directory
    pub fn content_url(&self, path: &str) -> Result<Url> {
        self.url_for(&format!("{}/{}", self.content_dir(), path.trim_start_matches('/')))
    }

    /// Use `dir` as content directory, or detect it from the homepage
    pub fn resolve_content_dir(&mut self, dir: Option<&str>) -> Result<()> {
        let dir = match dir {
            Some(d) => Some(d.trim_matches('/').to_string()),
            None => self.detect_content_dir(),
        };
        match dir {
            Some(d) if !d.is_empty() => {
                debug!(content_dir = %d, "content directory resolved");
                self.content_dir = Some(d);
                Ok(())
            }
            _ => Err(Error::ContentDirNotFound),
        }
    }

    /// Find the content directory in homepage asset URLs
    fn detect_content_dir(&self) -> Option<String> {
        if CONTENT_DIR_LITERAL_RE.is_match(&self.homepage) {
            return Some(DEFAULT_CONTENT_DIR.to_string());
        }

        let host = regex::escape(self.url.host_str()?);
        let path = regex::escape(self.url.path());
        let pattern = format!(
            r#"(?i)(?:href|src)\s*=\s*["'](?:(?:https?:)?//{host}(?::\d+)?)?{path}([^"'\s?#]+?)/(?:themes|plugins)/"#
        );
        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(&self.homepage)?;
        Some(caps.get(1)?.as_str().to_string())
    }

    /// Check `wp-signup.php` and remember whether the site is a multisite
    pub async fn detect_multisite(&mut self) {
        let Ok(url) = self.url_for(SIGNUP_PATH) else {
            return;
        };
        self.multisite = match self.http.get(&url).await {
            Ok(response) => match (response.status, response.redirect_location()) {
                (302, Some(location)) => location.contains(SIGNUP_PATH),
                (200, _) => true,
                _ => false,
            },
            Err(_) => false,
        };
    }

    /// Whether the plugins directory answers with anything but 404
    pub async fn plugins_dir_exists(&self) -> bool {
        let Ok(url) = self.content_url("plugins/") else {
            return false;
        };
        matches!(self.http.head(&url).await, Ok(r) if r.status != 404)
    }

    /// URL of the plugins directory
    pub fn plugins_dir_url(&self) -> String {
        format!("{}{}/plugins/", self.url, self.content_dir())
    }

    /// Homepage headers outside the list of standard ones, sorted
    pub fn interesting_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !KNOWN_HEADERS.contains(&name.as_str()))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        headers.sort();
        headers
    }

    /// Homepage script/iframe sources matching any malware pattern, sorted
    pub fn malwares(&self, patterns: &[Regex]) -> Vec<String> {
        let mut found: Vec<String> = patterns
            .iter()
            .flat_map(|re| re.captures_iter(&self.homepage))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// Run every site-level check
    ///
    /// Must be called after the content directory is resolved.
    pub async fn inspect(&self, malwares: &[Regex]) -> SiteFindings {
        let (robots, readme, fpd, debug_log, config_backups, search_replace, registration) = futures::join!(
            self.robots(),
            self.found_if(README_PATH, |r| r.status == 200 && WORDPRESS_RE.is_match(&r.text())),
            self.found_if(FPD_PATH, |r| FATAL_ERROR_RE.is_match(&r.text())),
            self.debug_log(),
            self.config_backups(),
            self.found_if(SEARCH_REPLACE_DB_PATH, |r| {
                r.status == 200 && r.text().to_lowercase().contains("by interconnect")
            }),
            self.registration_enabled(),
        );
        let (robots_url, robots_entries) = robots.unzip();

        SiteFindings {
            interesting_headers: self.interesting_headers(),
            robots_url,
            robots_entries: robots_entries.unwrap_or_default(),
            readme_url: readme,
            full_path_disclosure_url: fpd,
            debug_log_url: debug_log,
            config_backups,
            search_replace_db_url: search_replace,
            xml_rpc_url: self.xml_rpc_url().map(str::to_string),
            multisite: self.multisite,
            registration_enabled: registration,
            login_protection: None,
            malwares: self.malwares(malwares),
        }
    }

    /// GET a path and return its URL when `check` accepts the response
    async fn found_if(&self, path: &str, check: impl Fn(&ProbeResponse) -> bool) -> Option<String> {
        let url = self.url_for(path).ok()?;
        let response = self.http.get(&url).await.ok()?;
        check(&response).then(|| url.to_string())
    }

    async fn robots(&self) -> Option<(String, Vec<String>)> {
        let url = self.url_for(ROBOTS_PATH).ok()?;
        let response = self.http.get(&url).await.ok()?;
        if response.status != 200 {
            return None;
        }

        let body = response.text();
        let mut entries: Vec<String> = ROBOTS_RULE_RE
            .captures_iter(&body)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|e| !DEFAULT_ROBOTS_ENTRIES.contains(&e.as_str()))
            .collect();
        entries.sort();
        entries.dedup();
        Some((url.to_string(), entries))
    }

    async fn debug_log(&self) -> Option<String> {
        let path = format!("{}/debug.log", self.content_dir());
        self.found_if(&path, |r| r.status == 200 && DEBUG_LOG_RE.is_match(&r.text()))
            .await
    }

    async fn config_backups(&self) -> Vec<String> {
        let checks = CONFIG_BACKUPS.iter().map(|name| {
            self.found_if(name, |r| {
                let body = r.text();
                r.status == 200 && DEFINE_RE.is_match(&body) && !HTML_RE.is_match(&body)
            })
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    async fn registration_enabled(&self) -> bool {
        let path = if self.multisite { SIGNUP_PATH } else { REGISTER_PATH };
        let Ok(url) = self.url_for(path) else {
            return false;
        };
        match self.http.get(&url).await {
            Ok(r) if r.status == 200 => {
                let body = r.text();
                if self.multisite {
                    body.contains(r#"<form id="setupform""#)
                } else {
                    body.contains(r#"name="registerform""#) || body.contains(r#"id="registerform""#)
                }
            }
            _ => false,
        }
    }
}

impl RedirectionProbe for Target {
    fn redirection(&self) -> Option<&str> {
        match self.status {
            301 | 302 => self
                .headers
                .get("location")
                .and_then(|v| v.to_str().ok())
                .filter(|l| !l.is_empty()),
            _ => None,
        }
    }
}

impl XmlRpcProbe for Target {
    fn xml_rpc_url(&self) -> Option<&str> {
        self.headers
            .get("x-pingback")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl WordPressProbe for Target {
    async fn is_wordpress(&self) -> bool {
        if let Ok(url) = self.login_url()
            && let Ok(response) = self.http.get_following(&url).await
            && WORDPRESS_RE.is_match(&response.text())
        {
            return true;
        }

        let xmlrpc = match self.xml_rpc_url() {
            Some(u) => self.url.join(u).ok(),
            None => self.url_for(XMLRPC_PATH).ok(),
        };
        let Some(xmlrpc) = xmlrpc else {
            return false;
        };
        match self.http.get_following(&xmlrpc).await {
            Ok(response) => response.text().to_lowercase().contains(XMLRPC_MARKER),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConfig;
    use reqwest::header::HeaderValue;

    fn target(homepage: &str) -> Target {
        Target {
            http: HttpClient::new(&HttpConfig::default()).unwrap(),
            url: Url::parse("http://example.com/blog/").unwrap(),
            status: 200,
            headers: HeaderMap::new(),
            homepage: homepage.to_string(),
            content_dir: None,
            multisite: false,
        }
    }

    #[test]
    fn parse_valid_url() {
        let url = parse_target_url("http://example.com/blog", true).unwrap();
        assert_eq!(url.as_str(), "http://example.com/blog/");
    }

    #[test]
    fn add_https_scheme() {
        let url = parse_target_url("example.com", true).unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn parse_invalid_url() {
        assert!(parse_target_url("not a url", false).is_err());
    }

    #[test]
    fn reject_localhost() {
        let result = parse_target_url("http://localhost", false);
        assert!(result.unwrap_err().to_string().contains("localhost"));
        assert!(parse_target_url("http://foo.localhost", false).is_err());
        assert!(parse_target_url("http://localhost:8080", true).is_ok());
    }

    #[test]
    fn reject_private_ip() {
        assert!(parse_target_url("http://127.0.0.1/", false).is_err());
        assert!(parse_target_url("http://192.168.1.10/", false).is_err());
    }

    #[test]
    fn reject_file_scheme() {
        let result = parse_target_url("file:///etc/passwd", false);
        assert!(result.unwrap_err().to_string().contains("scheme"));
    }

    #[test]
    fn internal_ip_detection() {
        use std::net::Ipv4Addr;

        assert!(is_internal_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(is_internal_ip(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
        assert!(is_internal_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert!(is_internal_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_internal_ip(IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))));
        assert!(is_internal_ip(IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1))));

        assert!(!is_internal_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
        assert!(!is_internal_ip(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
    }

    #[test]
    fn content_dir_literal() {
        let mut t = target(r#"<link href="http://example.com/blog/wp-content/themes/x/style.css">"#);
        t.resolve_content_dir(None).unwrap();
        assert_eq!(t.content_dir(), "wp-content");
    }

    #[test]
    fn content_dir_custom() {
        let mut t = target(
            r#"<script src="http://example.com/blog/assets/app/plugins/jq/jq.js"></script>"#,
        );
        t.resolve_content_dir(None).unwrap();
        assert_eq!(t.content_dir(), "assets/app");

        let mut t = target(r#"<img src='/blog/static/themes/t/logo.png'>"#);
        t.resolve_content_dir(None).unwrap();
        assert_eq!(t.content_dir(), "static");
    }

    #[test]
    fn content_dir_ignores_other_hosts() {
        let mut t = target(r#"<script src="https://cdn.other.com/blog/lib/plugins/x.js"></script>"#);
        assert!(matches!(
            t.resolve_content_dir(None),
            Err(Error::ContentDirNotFound)
        ));
    }

    #[test]
    fn content_dir_override() {
        let mut t = target("");
        t.resolve_content_dir(Some("/custom/")).unwrap();
        assert_eq!(t.content_dir(), "custom");
        assert_eq!(
            t.content_url("plugins/akismet/readme.txt").unwrap().as_str(),
            "http://example.com/blog/custom/plugins/akismet/readme.txt"
        );
    }

    #[test]
    fn xml_rpc_from_pingback_header() {
        let mut t = target("");
        assert!(!t.has_xml_rpc());
        t.headers.insert(
            "x-pingback",
            HeaderValue::from_static("http://example.com/blog/xmlrpc.php"),
        );
        assert_eq!(t.xml_rpc_url(), Some("http://example.com/blog/xmlrpc.php"));
    }

    #[test]
    fn homepage_redirection() {
        let mut t = target("");
        assert_eq!(t.redirection(), None);
        t.status = 301;
        t.headers
            .insert("location", HeaderValue::from_static("http://new-location.com"));
        assert_eq!(t.redirection(), Some("http://new-location.com"));
    }

    #[test]
    fn interesting_headers_skip_standard_ones() {
        let mut t = target("");
        t.headers.insert("server", HeaderValue::from_static("Apache"));
        t.headers.insert("content-type", HeaderValue::from_static("text/html"));
        t.headers.insert("x-powered-by", HeaderValue::from_static("PHP/5.4"));
        assert_eq!(
            t.interesting_headers(),
            vec![
                ("server".to_string(), "Apache".to_string()),
                ("x-powered-by".to_string(), "PHP/5.4".to_string()),
            ]
        );
    }

    #[test]
    fn malware_sources() {
        let t = target(
            r#"<html><head>
<script type="text/javascript" src="http://evil.example.com/x.js?v=2"></script>
<script src='/blog/wp-includes/js/jquery/jquery.js'></script>
<iframe width="1" src="https://bad-cdn.net/js/frame.html"></iframe>
<a href="http://evil.example.com/page">link</a>
</head></html>"#,
        );
        let patterns = vec![
            malware_pattern(r"https?://evil\.example\.com").unwrap(),
            malware_pattern(r"https?://bad-cdn\.net/js").unwrap(),
        ];
        assert_eq!(
            t.malwares(&patterns),
            vec![
                "http://evil.example.com/x.js?v=2".to_string(),
                "https://bad-cdn.net/js/frame.html".to_string(),
            ]
        );
        assert!(t.malwares(&[]).is_empty());
        assert!(target("<p>clean</p>").malwares(&patterns).is_empty());
    }

    #[test]
    fn basic_auth_from_status() {
        let mut t = target("");
        assert!(!t.has_basic_auth());
        t.status = 401;
        assert!(t.has_basic_auth());
    }
}
