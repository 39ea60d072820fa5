//! Test helpers for pipeline tests.
//!
//! Provides a mock server acting as both feed source and webhook destination,
//! plus helpers for configuration and feed definition files.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;

use feedhook::Config;

/// A POST received by a mock hook.
#[derive(Debug, Clone)]
pub struct ReceivedPost {
    /// Parsed JSON body.
    pub body: serde_json::Value,
    /// Content type header.
    pub content_type: Option<String>,
    /// Arrival time.
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    feeds: Mutex<HashMap<String, String>>,
    scripts: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    received: Mutex<HashMap<String, Vec<ReceivedPost>>>,
}

/// Mock feed source and webhook destination on 127.0.0.1.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
}

async fn serve_feed(
    State(state): State<Arc<MockState>>,
    UrlPath(name): UrlPath<String>,
) -> impl IntoResponse {
    match state.feeds.lock().unwrap().get(&name) {
        Some(xml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/rss+xml")],
            xml.clone(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "no such feed".to_string(),
        ),
    }
}

async fn receive_hook(
    State(state): State<Arc<MockState>>,
    UrlPath(name): UrlPath<String>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let post = ReceivedPost {
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        at: Instant::now(),
    };
    state
        .received
        .lock()
        .unwrap()
        .entry(name.clone())
        .or_default()
        .push(post);

    let (status, body) = state
        .scripts
        .lock()
        .unwrap()
        .get_mut(&name)
        .and_then(|script| script.pop_front())
        .unwrap_or((204, String::new()));

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

impl MockServer {
    /// Start the server on an ephemeral port.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/feeds/:name", get(serve_feed))
            .route("/hooks/:name", post(receive_hook))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// URL of a served feed.
    pub fn feed_url(&self, name: &str) -> String {
        format!("http://{}/feeds/{}", self.addr, name)
    }

    /// URL of a mock hook.
    pub fn hook_url(&self, name: &str) -> String {
        format!("http://{}/hooks/{}", self.addr, name)
    }

    /// Serve `xml` as feed `name`.
    pub fn set_feed(&self, name: &str, xml: String) {
        self.state
            .feeds
            .lock()
            .unwrap()
            .insert(name.to_string(), xml);
    }

    /// Answer the next POSTs to hook `name` with these statuses and bodies.
    /// Once the script runs out the hook answers 204.
    pub fn script_hook(&self, name: &str, responses: &[(u16, &str)]) {
        self.state.scripts.lock().unwrap().insert(
            name.to_string(),
            responses
                .iter()
                .map(|(status, body)| (*status, body.to_string()))
                .collect(),
        );
    }

    /// POSTs received by hook `name`.
    pub fn received(&self, name: &str) -> Vec<ReceivedPost> {
        self.state
            .received
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

/// One RSS item.
pub fn rss_item(title: &str, link: &str, pub_date: Option<&str>, description: &str) -> String {
    let pub_date = pub_date
        .map(|d| format!("<pubDate>{d}</pubDate>"))
        .unwrap_or_default();
    format!(
        "<item><title><![CDATA[{title}]]></title><link>{link}</link><guid>{link}</guid>{pub_date}<description><![CDATA[{description}]]></description></item>"
    )
}

/// An RSS document with the given items, newest first.
pub fn rss(items: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Mock</title><link>https://example.com</link><description>mock</description>{}</channel></rss>"#,
        items.concat()
    )
}

/// Configuration rooted in `dir` with short delays.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.sync.feeds_dir = dir.path().join("feeds").display().to_string();
    config.sync.cache_dir = dir.path().join("cache").display().to_string();
    config.sync.status_file = dir.path().join("status.json").display().to_string();
    config.sync.fetch_timeout_secs = 5;
    config.sync.fetch_backoff_secs = 0;
    config.sync.delivery_retry_delay_ms = 10;
    config.sync.destination_pacing_ms = 10;
    config.sync.default_rate_limit_secs = 0.05;
    config.logging.file = dir.path().join("feedhook.log").display().to_string();
    config
}

/// Write a feed definition file.
pub fn write_feed(dir: &Path, file: &str, name: &str, source_url: &str, destinations: &[String]) {
    let feeds = dir.join("feeds");
    std::fs::create_dir_all(&feeds).unwrap();
    let destinations = destinations
        .iter()
        .map(|d| format!("\"{d}\""))
        .collect::<Vec<_>>()
        .join(", ");
    std::fs::write(
        feeds.join(file),
        format!(
            "name = \"{name}\"\nsource_url = \"{source_url}\"\ndestinations = [{destinations}]\ncolor = 3447003\n"
        ),
    )
    .unwrap();
}
