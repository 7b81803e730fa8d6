//! HTTP side of the dev server.
//!
//! Request handling order:
//!
//! 1. `/__packrat/status` reports the served generation and the last error.
//! 2. Paths under `output.publicPath` are looked up in the current generation.
//! 3. With `historyApiFallback`, extension-less HTML requests get the app shell.
//! 4. Files under `devServer.contentBase`.
//! 5. 404.

use crate::state::DevState;
use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use packrat_core::bundler::content_type;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Status endpoint path.
pub const STATUS_PATH: &str = "/__packrat/status";

/// Build the router over shared state.
pub fn router(state: Arc<DevState>) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .fallback(serve_request)
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<DevState>) -> io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn status(State(state): State<Arc<DevState>>) -> impl IntoResponse {
    Json(state.status())
}

async fn serve_request(
    State(state): State<Arc<DevState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path();
    let (status, response) = if method == Method::GET || method == Method::HEAD {
        respond(&state, path, &headers).await
    } else {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            StatusCode::METHOD_NOT_ALLOWED.into_response(),
        )
    };

    if !state.quiet() {
        info!(method = %method, path, status = status.as_u16(), "request");
    }
    response
}

async fn respond(state: &DevState, path: &str, headers: &HeaderMap) -> (StatusCode, Response) {
    let prefix = url_prefix(state.public_path());
    if let (Some(name), Some(generation)) = (path.strip_prefix(prefix.as_str()), state.current()) {
        if let Some(artifact) = generation.artifact(name) {
            return ok(artifact.content_type(), artifact.bytes.to_vec());
        }
    }

    let options = state.options();
    if options.history_api_fallback && accepts_html(headers) && !has_extension(path) {
        debug!(path, "history fallback");
        return ok("text/html; charset=utf-8", app_shell(state).await.into_bytes());
    }

    if let Some(file) = static_path(&options.content_base, path) {
        if let Ok(bytes) = tokio::fs::read(&file).await {
            return ok(content_type(path), bytes);
        }
    }

    (
        StatusCode::NOT_FOUND,
        (StatusCode::NOT_FOUND, format!("Not found: {path}")).into_response(),
    )
}

fn ok(content_type: &'static str, body: Vec<u8>) -> (StatusCode, Response) {
    (
        StatusCode::OK,
        (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response(),
    )
}

/// URL path prefix of artifacts: `publicPath` with any origin removed and
/// surrounding slashes ensured.
pub fn url_prefix(public_path: &str) -> String {
    let path = match public_path.split_once("//") {
        Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None => public_path,
    };
    let path = path.trim_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}/")
    }
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/html") || v.contains("*/*"))
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|segment| segment.contains('.'))
}

/// File under `root` for a URL path, refusing to leave `root`.
fn static_path(root: &Path, path: &str) -> Option<PathBuf> {
    let mut file = root.to_path_buf();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == ".." || segment.contains('\\') {
            return None;
        }
        file.push(segment);
    }
    file.is_file().then_some(file)
}

/// The configured index document, or a page loading every entry.
async fn app_shell(state: &DevState) -> String {
    let options = state.options();
    if let Ok(html) = tokio::fs::read_to_string(options.content_base.join(&options.index)).await {
        return html;
    }

    let mut scripts = Vec::new();
    if let Some(generation) = state.current() {
        for entry in &generation.entrypoints {
            for url in &entry.urls {
                if !scripts.contains(url) {
                    scripts.push(url.clone());
                }
            }
        }
    }
    generate_index_html(&scripts)
}

fn generate_index_html(scripts: &[String]) -> String {
    let tags: String = scripts
        .iter()
        .map(|url| format!("  <script src=\"{url}\"></script>\n"))
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>packrat dev</title>
</head>
<body>
  <div id="app"></div>
{tags}</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrat_core::bundler::{ArtifactKind, EmitOutput, EmittedArtifact, EntryPoint};
    use packrat_core::config::DevServerOptions;
    use std::fs;
    use tempfile::tempdir;

    fn artifact(name: &str, bytes: &[u8]) -> EmittedArtifact {
        EmittedArtifact {
            filename: name.to_string(),
            bytes: bytes.to_vec().into(),
            content_hash: String::new(),
            kind: ArtifactKind::Chunk,
        }
    }

    fn state(content_base: &Path, fallback: bool) -> Arc<DevState> {
        let state = DevState::new(
            DevServerOptions {
                history_api_fallback: fallback,
                no_info: true,
                port: 0,
                host: "127.0.0.1".to_string(),
                content_base: content_base.to_path_buf(),
                index: "index.html".to_string(),
            },
            "/dist/",
        );
        state.publish(EmitOutput {
            artifacts: vec![artifact("adb.js", b"var adb = 1;\n"), artifact("logo.png", b"\x89PNG")],
            entrypoints: vec![EntryPoint {
                name: "adb".to_string(),
                files: vec!["adb.js".to_string()],
                urls: vec!["/dist/adb.js".to_string()],
            }],
            warnings: Vec::new(),
        });
        Arc::new(state)
    }

    async fn start(state: Arc<DevState>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        format!("http://{addr}")
    }

    #[test]
    fn test_url_prefix() {
        assert_eq!(url_prefix("/dist/"), "/dist/");
        assert_eq!(url_prefix("dist"), "/dist/");
        assert_eq!(url_prefix(""), "/");
        assert_eq!(url_prefix("https://cdn.example.com/assets/"), "/assets/");
        assert_eq!(url_prefix("//cdn.example.com"), "/");
    }

    #[test]
    fn test_static_path_stays_in_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("robots.txt"), "").unwrap();
        assert!(static_path(dir.path(), "/robots.txt").is_some());
        assert!(static_path(dir.path(), "/../robots.txt").is_none());
        assert!(static_path(dir.path(), "/").is_none());
    }

    #[tokio::test]
    async fn test_artifacts_served_with_exact_bytes() {
        let dir = tempdir().unwrap();
        let base = start(state(dir.path(), true)).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{base}/dist/adb.js")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(
            res.headers()["content-type"],
            "application/javascript; charset=utf-8"
        );
        assert_eq!(&res.bytes().await.unwrap()[..], b"var adb = 1;\n");

        let res = client.get(format!("{base}/dist/logo.png")).send().await.unwrap();
        assert_eq!(&res.bytes().await.unwrap()[..], b"\x89PNG");

        let res = client.get(format!("{base}/dist/missing.js")).send().await.unwrap();
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_history_fallback_returns_shell() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html>shell</html>").unwrap();
        let base = start(state(dir.path(), true)).await;
        let client = reqwest::Client::new();

        let res = client
            .get(format!("{base}/users/42"))
            .header("accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "<html>shell</html>");

        // A file-like path is not a client route
        let res = client
            .get(format!("{base}/users/42.json"))
            .header("accept", "text/html")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404);

        let res = client
            .get(format!("{base}/users/42"))
            .header("accept", "application/json")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_generated_shell_loads_entries() {
        let dir = tempdir().unwrap();
        let base = start(state(dir.path(), true)).await;

        let res = reqwest::Client::new()
            .get(format!("{base}/settings"))
            .header("accept", "text/html")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.text().await.unwrap().contains("<script src=\"/dist/adb.js\"></script>"));
    }

    #[tokio::test]
    async fn test_static_files_and_no_fallback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();
        let base = start(state(dir.path(), false)).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{base}/robots.txt")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "User-agent: *");

        let res = client
            .get(format!("{base}/users/42"))
            .header("accept", "text/html")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_status_reports_generation_and_error() {
        let dir = tempdir().unwrap();
        let state = state(dir.path(), true);
        state.record_failure("Cannot resolve './missing'");
        let base = start(Arc::clone(&state)).await;

        let status: serde_json::Value = reqwest::get(format!("{base}{STATUS_PATH}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["generation"], 1);
        assert_eq!(status["lastError"], "Cannot resolve './missing'");
        assert_eq!(status["entrypoints"][0]["name"], "adb");

        // The last good generation keeps being served
        let res = reqwest::get(format!("{base}/dist/adb.js")).await.unwrap();
        assert_eq!(res.status(), 200);
    }
}
