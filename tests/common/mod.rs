//! Shared helpers for place-harvest integration tests
//!
//! Every test gets its own temp directory holding the SQLite store, the proxy
//! list and the image output directory. Requests go straight to a local
//! wiremock server (`use_proxy = false`), so the proxy entries only have to
//! parse.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use place_harvest::{Config, StageConfig};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Proxy list with three well-formed routes
pub const PROXIES: &str = "\
10.0.0.1:8080:alice:pw1
10.0.0.2:8080:bob:pw2
10.0.0.3:8080:carol:pw3
";

/// Bytes served as the place image
pub const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot really a png";

/// Test workspace: temp dir plus a config pointing into it
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
}

impl Harness {
    /// Workspace with the default proxy list and fast stage settings
    pub fn new() -> Self {
        Self::with_proxies(PROXIES)
    }

    /// Workspace whose proxy file holds `proxies`
    pub fn with_proxies(proxies: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let proxy_file = dir.path().join("proxies.txt");
        std::fs::write(&proxy_file, proxies).expect("write proxy file");

        let mut config = Config::default();
        config.persistence.database_path = dir.path().join("tasks.db");
        config.identities.proxy_file = proxy_file;
        config.identities.user_agents = vec!["ua-one".into(), "ua-two".into()];
        config.identities.use_proxy = false;
        config.scrape.stage = fast_stage(4, 3);
        config.images.stage = fast_stage(4, 3);
        config.images.output_dir = dir.path().join("images");

        Self { dir, config }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.config.images.output_dir.clone()
    }
}

/// Stage settings with no inter-batch pause and a short timeout
pub fn fast_stage(batch_size: usize, max_retries: u32) -> StageConfig {
    StageConfig {
        batch_size,
        max_retries,
        timeout: Duration::from_secs(5),
        batch_delay: Duration::ZERO,
        delay_jitter: false,
    }
}

/// Minimal place page with Open Graph title and image
pub fn place_page(title: &str, image: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head>
<meta property="og:title" content="{title}">
<meta property="og:image" content="{image}">
</head><body><div id="app"></div></body></html>"#
    )
}

/// Serve `body` as HTML at `route`
pub async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Serve [`IMAGE_BYTES`] at `route`
pub async fn mount_image(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(IMAGE_BYTES),
        )
        .mount(server)
        .await;
}
