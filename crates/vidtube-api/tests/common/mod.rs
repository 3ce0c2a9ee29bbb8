#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use vidtube_api::media::{MediaHost, UploadedAsset};
use vidtube_api::session::{SessionConfig, SessionManager};
use vidtube_api::state::{AppState, AppStateInner};
use vidtube_db::Database;
use vidtube_types::models::AssetKind;

/// In-memory media host. Remembers which URLs are live and can be told to
/// fail uploads of images or every delete.
#[derive(Default)]
pub struct FakeMedia {
    live: Mutex<HashSet<String>>,
    pub fail_image_uploads: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FakeMedia {
    pub fn is_live(&self, url: &str) -> bool {
        self.live.lock().unwrap().contains(url)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn insert(&self, url: &str) {
        self.live.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl MediaHost for FakeMedia {
    async fn upload(&self, path: &Path) -> anyhow::Result<UploadedAsset> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("bin").to_string();
        let is_video = ext == "mp4";
        if !is_video && self.fail_image_uploads.load(Ordering::SeqCst) {
            anyhow::bail!("image upload refused");
        }
        anyhow::ensure!(path.exists(), "staged file missing");

        let url = format!("https://media.test/{}.{}", Uuid::new_v4(), ext);
        self.insert(&url);
        Ok(UploadedAsset {
            url,
            duration: is_video.then_some(12.5),
        })
    }

    async fn delete(&self, url: &str, _kind: AssetKind) -> anyhow::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("delete refused");
        }
        self.live.lock().unwrap().remove(url);
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub media: Arc<FakeMedia>,
    temp_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.temp_dir);
    }
}

pub fn app() -> TestApp {
    let media = Arc::new(FakeMedia::default());
    let temp_dir = std::env::temp_dir().join(format!("vidtube-test-{}", Uuid::new_v4()));
    let state: AppState = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        sessions: SessionManager::new(&SessionConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(86_400),
        }),
        media: media.clone(),
        temp_dir: temp_dir.clone(),
        cookie_secure: false,
    });
    TestApp {
        router: vidtube_api::router(state.clone()),
        state,
        media,
        temp_dir,
    }
}

const BOUNDARY: &str = "vidtube-test-boundary";

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

pub struct Reply {
    pub status: StatusCode,
    pub cookies: Vec<String>,
    pub json: Value,
}

async fn read(response: Response<Body>) -> Reply {
    let status = response.status();
    let cookies = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, cookies, json }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Reply {
        read(self.router.clone().oneshot(request).await.unwrap()).await
    }

    pub async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> Reply {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn call(&self, method: &str, uri: &str, token: Option<&str>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn multipart(&self, method: &str, uri: &str, token: Option<&str>, parts: &[Part<'_>]) -> Reply {
        let (content_type, body) = multipart_body(parts);
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    pub async fn register(&self, user_name: &str) -> Reply {
        let email = format!("{user_name}@example.com");
        self.multipart(
            "POST",
            "/api/v1/users/register",
            None,
            &[
                Part::Text("fullName", "Test User"),
                Part::Text("userName", user_name),
                Part::Text("email", &email),
                Part::Text("password", "correct horse"),
                Part::File("avatar", "me.png", b"png-bytes"),
            ],
        )
        .await
    }

    pub async fn login(&self, user_name: &str) -> Reply {
        self.json(
            "POST",
            "/api/v1/users/login",
            None,
            json!({ "userName": user_name, "password": "correct horse" }),
        )
        .await
    }

    /// Register and log in; returns (user id, access token).
    pub async fn signed_in(&self, user_name: &str) -> (String, String) {
        let registered = self.register(user_name).await;
        assert_eq!(registered.status, StatusCode::CREATED, "{}", registered.json);
        let login = self.login(user_name).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.json);
        (
            login.json["data"]["user"]["id"].as_str().unwrap().to_string(),
            login.json["data"]["accessToken"].as_str().unwrap().to_string(),
        )
    }

    pub async fn publish(&self, token: &str, title: &str) -> Reply {
        self.multipart(
            "POST",
            "/api/v1/videos",
            Some(token),
            &[
                Part::Text("title", title),
                Part::Text("description", "a test video"),
                Part::File("videoFile", "clip.mp4", b"mp4-bytes"),
                Part::File("thumbnail", "thumb.jpg", b"jpg-bytes"),
            ],
        )
        .await
    }
}
