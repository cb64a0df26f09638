mod common;

use common::{config, homepage, mount_file, mount_wordpress, scanner};
use tokio_test::assert_ok;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wordpress_recon::data::parse_wordlist;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wordpress_recon::{
    ComponentKind, FingerprintDb, KnowledgeBase, PassStats, ProgressObserver, ScanConfig,
    ScanInputs, StopSignal,
};

fn plugins_config() -> ScanConfig {
    let mut config = config();
    config.enumerate.plugins = true;
    config
}

#[tokio::test]
async fn wordlist_finds_installed_plugin_only() {
    let server = MockServer::start().await;
    mount_wordpress(&server, &homepage("twentytwenty")).await;
    mount_file(
        &server,
        "/wp-content/plugins/akismet/readme.txt",
        200,
        "=== Akismet ===\nStable tag: 3.1.7\n",
    )
    .await;

    let inputs = ScanInputs {
        plugins: parse_wordlist("akismet\nhello-dolly\n"),
        ..ScanInputs::default()
    };
    let report = assert_ok!(scanner(&server, plugins_config(), inputs).scan().await);

    let plugins: Vec<_> = report.components_of(ComponentKind::Plugin).collect();
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].slug, "akismet");
    assert_eq!(plugins[0].version.as_deref(), Some("3.1.7"));
    assert_eq!(
        report.stats[&ComponentKind::Plugin],
        PassStats {
            probed: 2,
            matched: 1,
            undetermined: 0
        }
    );
    assert!(!report.interrupted);
}

#[tokio::test]
async fn passive_detection_from_homepage() {
    let server = MockServer::start().await;
    let page = r#"<html><head>
<meta name="generator" content="WordPress 6.4.2" />
<link rel='stylesheet' href='/wp-content/themes/astra/style.css?ver=4.5.2' />
<script src='/wp-content/plugins/contact-form-7/includes/js/index.js?ver=5.8.4'></script>
<script src='/wp-content/plugins/jetpack/js/app.js?ver=1748271784'></script>
</head><body></body></html>"#;
    mount_wordpress(&server, page).await;
    mount_file(
        &server,
        "/wp-content/themes/astra/style.css",
        200,
        "/*\nTheme Name: Astra\nVersion: 4.5.2\n*/",
    )
    .await;
    mount_file(
        &server,
        "/feed/",
        200,
        "<generator>https://wordpress.org/?v=6.4.2</generator>",
    )
    .await;

    let report = assert_ok!(
        scanner(&server, config(), ScanInputs::default())
            .scan()
            .await
    );

    let core = report.component(ComponentKind::Core, "wordpress").unwrap();
    assert_eq!(core.version.as_deref(), Some("6.4.2"));

    let theme = report.component(ComponentKind::Theme, "astra").unwrap();
    assert_eq!(theme.version.as_deref(), Some("4.5.2"));

    let cf7 = report.component(ComponentKind::Plugin, "contact-form-7").unwrap();
    assert_eq!(cf7.version.as_deref(), Some("5.8.4"));

    // Cache-busting timestamps are not versions
    let jetpack = report.component(ComponentKind::Plugin, "jetpack").unwrap();
    assert_eq!(jetpack.version, None);
}

/// A site where several plugins are installed, one with conflicting evidence
async fn busy_site() -> MockServer {
    let server = MockServer::start().await;
    mount_wordpress(&server, &homepage("twentytwenty")).await;
    for (slug, version) in [("akismet", "3.1.7"), ("jetpack", "12.0"), ("wordfence", "7.10.3")] {
        mount_file(
            &server,
            &format!("/wp-content/plugins/{slug}/readme.txt"),
            200,
            &format!("Stable tag: {version}\n"),
        )
        .await;
    }
    mount_file(&server, "/wp-content/plugins/forbidden/readme.txt", 403, "").await;
    mount_file(&server, "/wp-content/plugins/woocommerce/readme.txt", 200, "Stable tag: 8.2.1").await;
    mount_file(
        &server,
        "/wp-content/plugins/woocommerce/changelog.txt",
        200,
        "= 8.3.0 =\n* Fix\n",
    )
    .await;
    server
}

fn busy_wordlist() -> ScanInputs {
    let mut list = String::from("akismet\njetpack\nwordfence\nforbidden\nwoocommerce changelog.txt\n");
    for i in 0..20 {
        list.push_str(&format!("missing-{i}\n"));
    }
    ScanInputs {
        plugins: parse_wordlist(&list),
        knowledge_base: KnowledgeBase::from_json(
            r#"[
                {"id": "1", "kind": "plugin", "slug": "woocommerce", "title": "SQLi", "affected": "<8.0"},
                {"id": "2", "kind": "plugin", "slug": "akismet", "title": "XSS", "affected": "[3.0,3.1.7]"}
            ]"#,
        )
        .unwrap(),
        ..ScanInputs::default()
    }
}

#[tokio::test]
async fn report_is_independent_of_pool_size() {
    let server = busy_site().await;

    let mut reports = Vec::new();
    for threads in [1, 8] {
        let config = ScanConfig {
            threads,
            ..plugins_config()
        };
        let report = scanner(&server, config, busy_wordlist()).scan().await.unwrap();
        reports.push(serde_json::to_value(&report).unwrap());
    }
    assert_eq!(reports[0], reports[1]);

    let report = scanner(&server, plugins_config(), busy_wordlist()).scan().await.unwrap();
    assert_eq!(report.components_of(ComponentKind::Plugin).count(), 5);

    let akismet = report.component(ComponentKind::Plugin, "akismet").unwrap();
    assert_eq!(akismet.vulnerabilities.len(), 1);

    // 8.2.1 and 8.3.0 share no suffix: version unknown, vulnerability only possible
    let woo = report.component(ComponentKind::Plugin, "woocommerce").unwrap();
    assert_eq!(woo.version, None);
    assert!(woo.vulnerabilities.is_empty());
    assert_eq!(woo.possible_vulnerabilities.len(), 1);

    let forbidden = report.component(ComponentKind::Plugin, "forbidden").unwrap();
    assert_eq!(forbidden.version, None);
}

#[tokio::test]
async fn only_vulnerable_filters_report_not_probes() {
    let server = busy_site().await;
    let mut config = ScanConfig {
        threads: 4,
        ..plugins_config()
    };
    config.enumerate.only_vulnerable = true;

    let report = scanner(&server, config, busy_wordlist()).scan().await.unwrap();
    let slugs: Vec<&str> = report
        .components_of(ComponentKind::Plugin)
        .map(|c| c.slug.as_str())
        .collect();
    assert_eq!(slugs, ["akismet", "woocommerce"]);
    assert_eq!(report.stats[&ComponentKind::Plugin].probed, 25);
    assert_eq!(report.stats[&ComponentKind::Plugin].matched, 5);
}

#[tokio::test]
async fn excluded_slugs_are_not_probed() {
    let server = MockServer::start().await;
    mount_wordpress(&server, &homepage("twentytwenty")).await;
    Mock::given(method("GET"))
        .and(path("/wp-content/plugins/hello-dolly/readme.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Stable tag: 1.7.2"))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = plugins_config();
    config.exclude_content = Some("^hello".into());
    let inputs = ScanInputs {
        plugins: parse_wordlist("akismet\nhello-dolly\n"),
        ..ScanInputs::default()
    };
    let report = scanner(&server, config, inputs).scan().await.unwrap();
    assert_eq!(report.stats[&ComponentKind::Plugin].probed, 1);
    assert!(report.component(ComponentKind::Plugin, "hello-dolly").is_none());
}

#[tokio::test]
async fn soft_404_bodies_are_absent() {
    let server = MockServer::start().await;
    mount_wordpress(&server, &homepage("twentytwenty")).await;
    mount_file(
        &server,
        "/wp-content/plugins/akismet/readme.txt",
        200,
        "<html><h1>Oops! That page can't be found.</h1></html>",
    )
    .await;

    let mut config = plugins_config();
    config.exclude_body = Some("(?i)can't be found".into());
    let inputs = ScanInputs {
        plugins: parse_wordlist("akismet\n"),
        ..ScanInputs::default()
    };
    let report = scanner(&server, config, inputs).scan().await.unwrap();
    assert!(report.component(ComponentKind::Plugin, "akismet").is_none());
    assert_eq!(report.stats[&ComponentKind::Plugin].probed, 1);
}

#[tokio::test]
async fn checksum_fingerprint_gives_exact_core_version() {
    let server = MockServer::start().await;
    mount_wordpress(&server, &homepage("twentytwenty")).await;
    mount_file(&server, "/wp-includes/js/wp-emoji.js", 200, "hello").await;
    mount_file(&server, "/readme.html", 200, "<br /> Version 4.7").await;

    let inputs = ScanInputs {
        fingerprints: FingerprintDb::from_json(
            r#"{"core": [{"path": "wp-includes/js/wp-emoji.js",
                          "checksums": {"5d41402abc4b2a76b9719d911017c592": "4.7.1"}}]}"#,
        )
        .unwrap(),
        ..ScanInputs::default()
    };
    let report = scanner(&server, config(), inputs).scan().await.unwrap();
    let core = report.component(ComponentKind::Core, "wordpress").unwrap();
    assert_eq!(core.version.as_deref(), Some("4.7.1"));
    assert_eq!(core.confidence, 100);
}

#[tokio::test]
async fn timthumbs_in_main_theme() {
    let server = MockServer::start().await;
    mount_wordpress(&server, &homepage("newspaper")).await;
    mount_file(
        &server,
        "/wp-content/themes/newspaper/lib/timthumb.php",
        400,
        "<pre>A TimThumb error has occured<br />No image specified<br />TimThumb version : 1.33</pre>",
    )
    .await;

    let mut config = config();
    config.enumerate.timthumbs = true;
    let inputs = ScanInputs {
        timthumbs: parse_wordlist("plugins/old-slider/timthumb.php\n"),
        knowledge_base: KnowledgeBase::from_json(
            r#"[{"id": "TT-1", "kind": "timthumb", "slug": "timthumb", "title": "TimThumb RCE", "affected": "<2.0"}]"#,
        )
        .unwrap(),
        ..ScanInputs::default()
    };
    let report = scanner(&server, config, inputs).scan().await.unwrap();

    let found: Vec<_> = report.components_of(ComponentKind::Timthumb).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].slug, "wp-content/themes/newspaper/lib/timthumb.php");
    assert_eq!(found[0].version.as_deref(), Some("1.33"));
    assert_eq!(found[0].vulnerabilities[0].id, "TT-1");
}

#[tokio::test]
async fn users_from_author_archives() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("author", "1"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", format!("{}/author/admin/", server.uri()).as_str()),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("author", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<body class="archive author author-editor author-2">"#,
        ))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("author", "3"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_wordpress(&server, &homepage("twentytwenty")).await;

    let mut config = config();
    config.enumerate.users = true;
    config.enumerate.user_id_end = 3;
    let report = scanner(&server, config, ScanInputs::default()).scan().await.unwrap();

    let users: Vec<&str> = report
        .components_of(ComponentKind::User)
        .map(|c| c.slug.as_str())
        .collect();
    assert_eq!(users, ["admin", "editor"]);
    assert!(report.components_of(ComponentKind::User).all(|u| u.version.is_none()));
    assert_eq!(report.stats[&ComponentKind::User].probed, 3);
}

#[tokio::test]
async fn stopped_scan_dispatches_nothing() {
    let server = busy_site().await;
    let stop = StopSignal::new();
    stop.stop();

    let scanner = wordpress_recon::Scanner::builder(&server.uri())
        .config(plugins_config())
        .inputs(busy_wordlist())
        .stop_signal(stop)
        .build()
        .unwrap();
    let report = scanner.scan().await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.stats.get(&ComponentKind::Plugin), None);
    // Passive results gathered before the passes are kept
    assert!(report.component(ComponentKind::Core, "wordpress").is_some());
}

/// Sets the stop signal once `after` probes have completed
struct StopAfter {
    stop: StopSignal,
    after: usize,
    finished: AtomicUsize,
}

impl ProgressObserver for StopAfter {
    fn probe_finished(&self, _kind: ComponentKind) {
        if self.finished.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.stop.stop();
        }
    }
}

#[tokio::test]
async fn stop_during_pass_keeps_settled_components() {
    let server = busy_site().await;
    let stop = StopSignal::new();
    let observer = Arc::new(StopAfter {
        stop: stop.clone(),
        after: 2,
        finished: AtomicUsize::new(0),
    });

    let config = ScanConfig {
        threads: 1,
        ..plugins_config()
    };
    let scanner = wordpress_recon::Scanner::builder(&server.uri())
        .config(config)
        .inputs(busy_wordlist())
        .stop_signal(stop)
        .observer(observer)
        .build()
        .unwrap();
    let report = scanner.scan().await.unwrap();

    assert!(report.interrupted);
    let stats = report.stats[&ComponentKind::Plugin];
    assert_eq!(stats.probed, 2);
    assert_eq!(stats.matched, 2);

    let plugins: Vec<&str> = report
        .components_of(ComponentKind::Plugin)
        .map(|c| c.slug.as_str())
        .collect();
    assert_eq!(plugins, ["akismet", "jetpack"]);
    let akismet = report.component(ComponentKind::Plugin, "akismet").unwrap();
    assert_eq!(akismet.version.as_deref(), Some("3.1.7"));
    assert_eq!(akismet.vulnerabilities.len(), 1);
}
