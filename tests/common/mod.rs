#![allow(dead_code)]

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wordpress_recon::{ScanConfig, ScanInputs, Scanner};

pub const LOGIN_PAGE: &str =
    r#"<html><head><title>Log In &lsaquo; WordPress</title></head><body class="login"><form name="loginform"></form></body></html>"#;

/// Homepage of a stock install using the given theme and no plugins
pub fn homepage(theme: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head>
<meta name="generator" content="WordPress 6.4.2" />
<link rel='stylesheet' id='main-css' href='/wp-content/themes/{theme}/style.css?ver=2.1' media='all' />
</head><body class="home blog"><h1>Just another site</h1></body></html>"#
    )
}

/// Mount the pages every scan needs: homepage, login page and plugins directory
pub async fn mount_wordpress(server: &MockServer, homepage: &str) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(homepage))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/wp-content/plugins/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(server)
        .await;
}

/// Respond with `body` to a GET on `at`
pub async fn mount_file(server: &MockServer, at: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

pub fn config() -> ScanConfig {
    ScanConfig {
        allow_private: true,
        timeout_secs: 5,
        ..ScanConfig::default()
    }
}

pub fn scanner(server: &MockServer, config: ScanConfig, inputs: ScanInputs) -> Scanner {
    Scanner::builder(&server.uri())
        .config(config)
        .inputs(inputs)
        .build()
        .unwrap()
}
