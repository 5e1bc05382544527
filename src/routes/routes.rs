//! Defines routes for the file-drop service.
//!
//! ## Structure
//! - **Session endpoints**
//!   - `POST /login` : exchange the shared password for a session cookie
//!   - `POST /logout`: end the session
//!
//! - **Upload endpoints** (session required)
//!   - `POST /upload/check`: bytes already received for a resumable upload
//!   - `POST /upload/chunk`: store one chunk, publish on completion
//!   - `POST /upload`      : publish one or more files in a single request
//!   - `GET  /upload/files`: the caller's uploads from today
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        auth_handlers::{login, logout},
        health_handlers::{healthz, readyz},
        upload_handlers::{check_upload, list_files, upload_chunk, upload_files},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router with state and the configured body limit applied.
pub fn routes(state: AppState) -> Router {
    let body_limit = state.config.max_content_length;

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // session
        .route("/login", post(login))
        .route("/logout", post(logout))
        // uploads
        .route("/upload", post(upload_files))
        .route("/upload/check", post(check_upload))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/files", get(list_files))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, FileConfig};
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use std::{net::SocketAddr, path::PathBuf};
    use tower::ServiceExt;

    const BOUNDARY: &str = "filedrop-test-boundary";

    struct TestApp {
        _dir: tempfile::TempDir,
        router: Router,
        upload_dir: PathBuf,
        temp_dir: PathBuf,
    }

    fn test_app(ceiling: u64, allowed: &[&str]) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).unwrap();
        let file = FileConfig {
            upload_dir: Some(upload_dir.clone()),
            password: Some("letmein".into()),
            max_folder_size: Some(ceiling),
            allowed_extensions: Some(allowed.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        };
        let config = AppConfig::resolve(Default::default(), |_| None, file).unwrap();
        let temp_dir = config.temp_dir.clone();
        TestApp {
            _dir: dir,
            router: routes(AppState::new(config)),
            upload_dir,
            temp_dir,
        }
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn send(router: &Router, mut request: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let addr: SocketAddr = "1.2.3.4:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json, cookie)
    }

    fn form_request(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>], cookie: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .header(header::COOKIE, cookie)
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn login(app: &TestApp) -> String {
        let (status, _, cookie) =
            send(&app.router, form_request("/login", "password=letmein", None)).await;
        assert_eq!(status, StatusCode::OK);
        cookie.expect("login sets a session cookie")
    }

    async fn chunk(app: &TestApp, cookie: &str, index: &str, data: &[u8]) -> (StatusCode, Value) {
        let parts = [
            Part::Text("file_id", "abc"),
            Part::Text("chunk_index", index),
            Part::Text("total_chunks", "3"),
            Part::Text("filename", "report.pdf"),
            Part::Text("filesize", "250"),
            Part::Text("is_compressed", "false"),
            Part::File("chunk", "blob", data),
        ];
        let (status, json, _) =
            send(&app.router, multipart_request("/upload/chunk", &parts, cookie)).await;
        (status, json)
    }

    fn published(app: &TestApp) -> Vec<String> {
        std::fs::read_dir(&app.upload_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = test_app(1000, &[]);
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let (status, json, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn readyz_checks_both_directories() {
        let app = test_app(1000, &[]);
        std::fs::create_dir_all(&app.temp_dir).unwrap();
        let request = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let (status, json, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["checks"]["upload_dir"]["ok"], true);
        assert_eq!(json["checks"]["temp_dir"]["ok"], true);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let app = test_app(1000, &[]);
        let (status, json, cookie) =
            send(&app.router, form_request("/login", "password=nope", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);
        assert!(cookie.is_none());
    }

    #[tokio::test]
    async fn upload_endpoints_require_a_session() {
        let app = test_app(1000, &[]);
        let (status, _, _) =
            send(&app.router, form_request("/upload/check", "file_id=abc", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(
            &app.router,
            form_request("/upload/check", "file_id=abc", Some("filedrop_session=forged")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = chunk(&app, "filedrop_session=forged", "0", b"x").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!app.temp_dir.join("abc").exists());
    }

    #[tokio::test]
    async fn check_requires_file_id() {
        let app = test_app(1000, &[]);
        let cookie = login(&app).await;
        let (status, json, _) =
            send(&app.router, form_request("/upload/check", "", Some(&cookie))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn chunked_upload_end_to_end() {
        let app = test_app(1000, &[]);
        let cookie = login(&app).await;

        let (status, json) = chunk(&app, &cookie, "0", &[b'a'; 100]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["uploaded_size"], 100);

        let (status, json, _) =
            send(&app.router, form_request("/upload/check", "file_id=abc", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["uploaded_size"], 100);
        assert_eq!(json["received_chunks"], serde_json::json!([0]));

        let (_, json) = chunk(&app, &cookie, "1", &[b'b'; 100]).await;
        assert_eq!(json["uploaded_size"], 200);

        let (status, json) = chunk(&app, &cookie, "2", &[b'c'; 50]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["completed"], true);

        let files = published(&app);
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("1.2.3.4_"));
        assert!(files[0].ends_with("_report.pdf"));
        let size = std::fs::metadata(app.upload_dir.join(&files[0])).unwrap().len();
        assert_eq!(size, 250);
        assert!(!app.temp_dir.join("abc").exists());

        let request = Request::builder()
            .uri("/upload/files")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let (status, json, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["name"], "report.pdf");
        assert_eq!(json[0]["size"], 250);
    }

    #[tokio::test]
    async fn chunked_upload_over_quota_is_rejected() {
        let app = test_app(200, &[]);
        let cookie = login(&app).await;

        chunk(&app, &cookie, "0", &[b'a'; 100]).await;
        chunk(&app, &cookie, "1", &[b'b'; 100]).await;
        let (status, json) = chunk(&app, &cookie, "2", &[b'c'; 50]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().contains("200.00 B"));
        assert!(published(&app).is_empty());
        assert!(!app.temp_dir.join("abc").exists());
    }

    #[tokio::test]
    async fn chunk_without_payload_is_rejected() {
        let app = test_app(1000, &[]);
        let cookie = login(&app).await;
        let parts = [Part::Text("file_id", "abc")];
        let (status, json, _) =
            send(&app.router, multipart_request("/upload/chunk", &parts, &cookie)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn chunk_without_file_id_discards_payload() {
        let app = test_app(1000, &[]);
        let cookie = login(&app).await;
        let parts = [Part::File("chunk", "blob", b"data")];
        let (status, _, _) =
            send(&app.router, multipart_request("/upload/chunk", &parts, &cookie)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let leftovers = std::fs::read_dir(&app.temp_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn direct_upload_filters_extensions_and_resolves_collisions() {
        let app = test_app(1000, &["txt"]);
        let cookie = login(&app).await;
        let parts = [
            Part::File("file", "notes.txt", b"one"),
            Part::File("file", "notes.txt", b"two"),
            Part::File("file", "tool.exe", b"MZ"),
        ];
        let (status, json, _) =
            send(&app.router, multipart_request("/upload", &parts, &cookie)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["rejected"], serde_json::json!(["tool.exe"]));
        let uploaded: Vec<&str> = json["uploaded"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded[0].ends_with("_notes.txt"));
        assert!(uploaded[1].ends_with("_notes_1.txt"));
    }

    #[tokio::test]
    async fn direct_upload_over_quota_stores_nothing() {
        let app = test_app(10, &[]);
        let cookie = login(&app).await;
        let parts = [
            Part::File("file", "a.txt", b"aaaaaa"),
            Part::File("file", "b.txt", b"bbbbbb"),
        ];
        let (status, json, _) =
            send(&app.router, multipart_request("/upload", &parts, &cookie)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(published(&app).is_empty());
        assert_eq!(std::fs::read_dir(&app.temp_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let app = test_app(1000, &[]);
        let cookie = login(&app).await;
        let (status, _, _) = send(&app.router, form_request("/logout", "", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) =
            send(&app.router, form_request("/upload/check", "file_id=abc", Some(&cookie))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
