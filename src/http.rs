//! HTTP client wrapper
//!
//! Probes are sent without following redirects so `Location` headers can be
//! observed. A second client follows a bounded number of redirects for the
//! few checks that want the final page. Transport errors are retried a fixed
//! number of times before being surfaced.

use crate::error::{Error, Result};
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder};
use std::borrow::Cow;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// User agent for requests (standard Chrome on Windows)
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Attempts per request before a transport error is reported
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Redirects followed by the following client
pub const DEFAULT_MAX_REDIRECTS: usize = 2;

/// Credentials for HTTP basic authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::str::FromStr for BasicAuth {
    type Err = Error;

    /// Parse `login:password`
    fn from_str(s: &str) -> Result<Self> {
        let (username, password) = s
            .split_once(':')
            .filter(|(u, _)| !u.is_empty())
            .ok_or_else(|| Error::InvalidConfig("basic auth must be login:password".into()))?;
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Transport policy handed to the HTTP client
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_attempts: u32,
    pub proxy: Option<String>,
    pub basic_auth: Option<BasicAuth>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            proxy: None,
            basic_auth: None,
        }
    }
}

/// Status, headers and body of one response
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// Final URL (differs from the request only when redirects were followed)
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ProbeResponse {
    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Header value as a string, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Location` of a 301/302 response
    pub fn redirect_location(&self) -> Option<&str> {
        match self.status {
            301 | 302 => self.header("location").filter(|l| !l.is_empty()),
            _ => None,
        }
    }
}

/// Hex md5 of a response body
pub fn body_md5(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

/// HTTP client used by every probe
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    follow: Client,
    basic_auth: Option<BasicAuth>,
    max_attempts: u32,
}

impl HttpClient {
    /// Build clients from the transport policy
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let build = |policy: Policy| {
            let mut builder = Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.timeout)
                .redirect(policy)
                .cookie_store(true)
                .danger_accept_invalid_certs(false);

            if let Some(proxy_url) = &config.proxy {
                let proxy = reqwest::Proxy::all(proxy_url)
                    .map_err(|e| Error::HttpClient(format!("invalid proxy: {}", e)))?;
                builder = builder.proxy(proxy);
            }

            builder.build().map_err(|e| Error::HttpClient(e.to_string()))
        };

        Ok(Self {
            client: build(Policy::none())?,
            follow: build(Policy::limited(config.max_redirects))?,
            basic_auth: config.basic_auth.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// GET without following redirects
    pub async fn get(&self, url: &Url) -> Result<ProbeResponse> {
        self.with_retries(|| self.client.get(url.as_str())).await
    }

    /// GET following up to the configured number of redirects
    pub async fn get_following(&self, url: &Url) -> Result<ProbeResponse> {
        self.with_retries(|| self.follow.get(url.as_str())).await
    }

    /// HEAD without following redirects
    pub async fn head(&self, url: &Url) -> Result<ProbeResponse> {
        self.with_retries(|| self.client.head(url.as_str())).await
    }

    /// POST a form once, without following redirects
    ///
    /// Not retried: callers classify the response and decide themselves.
    pub async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<ProbeResponse> {
        self.send(self.client.post(url.as_str()).form(form)).await
    }

    async fn with_retries(&self, build: impl Fn() -> RequestBuilder) -> Result<ProbeResponse> {
        let mut attempt = 1;
        loop {
            match self.send(build()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_attempts => {
                    debug!(attempt, error = %e, "request failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<ProbeResponse> {
        let builder = match &self.basic_auth {
            Some(auth) => builder.basic_auth(&auth.username, Some(&auth.password)),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::HttpRequest(e.to_string()))?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::HttpRequest(e.to_string()))?
            .to_vec();

        debug!(%url, status, "response");
        Ok(ProbeResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, LOCATION};

    fn response(status: u16, body: &str) -> ProbeResponse {
        ProbeResponse {
            url: Url::parse("http://example.com/").unwrap(),
            status,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn parse_basic_auth() {
        let auth: BasicAuth = "admin:s3:cret".parse().unwrap();
        assert_eq!(auth.username, "admin");
        assert_eq!(auth.password, "s3:cret");
        assert!("nocolon".parse::<BasicAuth>().is_err());
        assert!(":pass".parse::<BasicAuth>().is_err());
    }

    #[test]
    fn redirect_location_only_for_301_302() {
        let mut r = response(302, "");
        r.headers
            .insert(LOCATION, HeaderValue::from_static("http://new-location.com"));
        assert_eq!(r.redirect_location(), Some("http://new-location.com"));

        r.status = 301;
        assert_eq!(r.redirect_location(), Some("http://new-location.com"));

        r.status = 200;
        assert_eq!(r.redirect_location(), None);
    }

    #[test]
    fn md5_of_body() {
        assert_eq!(body_md5(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(body_md5(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn build_client_with_proxy() {
        let config = HttpConfig {
            proxy: Some("http://127.0.0.1:8080".into()),
            ..HttpConfig::default()
        };
        assert!(HttpClient::new(&config).is_ok());
    }

    #[tokio::test]
    async fn transport_errors_surface_after_retries() {
        let client = HttpClient::new(&HttpConfig {
            timeout: Duration::from_secs(2),
            max_attempts: 2,
            ..HttpConfig::default()
        })
        .unwrap();
        // Port 9 (discard) is closed on test hosts
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        assert!(matches!(client.get(&url).await, Err(Error::HttpRequest(_))));
    }
}
