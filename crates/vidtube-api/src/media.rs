//! Media Host boundary: upload a staged file, get back a stable URL; delete by URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vidtube_types::models::AssetKind;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedAsset {
    pub url: String,
    /// Seconds, when the host could derive it (videos only).
    pub duration: Option<f64>,
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<UploadedAsset>;

    async fn delete(&self, url: &str, kind: AssetKind) -> Result<()>;
}

/// Identifier the host knows an asset by: the trailing URL path segment,
/// extension stripped.
pub fn public_id(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let id = match segment.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => segment,
    };
    (!id.is_empty()).then_some(id)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}

const UPLOAD_CHUNK: usize = 1024 * 1024;

/// Multipart part that reads the staged file in chunks while sending, so a
/// large video is never held in memory whole.
async fn streamed_part(path: &Path) -> Result<reqwest::multipart::Part> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("open staged file {}", path.display()))?;
    let len = file.metadata().await?.len();

    let stream = futures_util::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, std::io::Error>(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });

    Ok(reqwest::multipart::Part::stream_with_length(
        reqwest::Body::wrap_stream(stream),
        len,
    ))
}

// -- Cloudinary --------------------------------------------------------------

pub struct CloudinaryHost {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
struct CloudinaryUpload {
    secure_url: String,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct CloudinaryDestroy {
    result: String,
}

impl CloudinaryHost {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            cloud_name,
            api_key,
            api_secret,
        })
    }

    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/{}/{}",
            self.cloud_name, resource_type, action
        )
    }

    fn sign(&self, params: &[(&str, &str)]) -> String {
        sign_params(params, &self.api_secret)
    }
}

/// SHA-1 hex over `k1=v1&k2=v2...` (keys sorted) with the secret appended.
fn sign_params(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaHost for CloudinaryHost {
    async fn upload(&self, path: &Path) -> Result<UploadedAsset> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let file = streamed_part(path).await?.file_name(file_name);

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[("timestamp", timestamp.as_str())]);

        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature);

        let response = self
            .client
            .post(self.endpoint("auto", "upload"))
            .multipart(form)
            .send()
            .await
            .context("media upload request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("media upload rejected ({}): {}", status, body);
        }

        let uploaded: CloudinaryUpload = response.json().await.context("decode upload response")?;
        info!("Uploaded {} -> {}", path.display(), uploaded.secure_url);
        Ok(UploadedAsset {
            url: uploaded.secure_url,
            duration: uploaded.duration,
        })
    }

    async fn delete(&self, url: &str, kind: AssetKind) -> Result<()> {
        let id = public_id(url).ok_or_else(|| anyhow!("no public id in {url}"))?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", id), ("timestamp", timestamp.as_str())]);

        let response = self
            .client
            .post(self.endpoint(kind.as_str(), "destroy"))
            .form(&[
                ("public_id", id),
                ("timestamp", timestamp.as_str()),
                ("api_key", self.api_key.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await
            .context("media delete request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("media delete rejected ({}): {}", status, body);
        }

        let destroyed: CloudinaryDestroy = response.json().await.context("decode delete response")?;
        match destroyed.result.as_str() {
            "ok" => Ok(()),
            "not found" => {
                warn!("Asset {} already gone", id);
                Ok(())
            }
            other => bail!("media delete of {id} returned {other}"),
        }
    }
}

// -- Local disk --------------------------------------------------------------

/// Stores assets as `{dir}/{uuid}.{ext}`; the binary serves `dir` at `/media`.
pub struct LocalMediaHost {
    dir: PathBuf,
    public_base: String,
}

impl LocalMediaHost {
    pub async fn new(dir: PathBuf, public_base: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, url: &str) -> Result<PathBuf> {
        let id = public_id(url).ok_or_else(|| anyhow!("no public id in {url}"))?;
        // Only names this host generated are ever touched.
        id.parse::<Uuid>()
            .with_context(|| format!("{url} is not a local media URL"))?;
        let name = url
            .rsplit('/')
            .next()
            .ok_or_else(|| anyhow!("no file name in {url}"))?;
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl MediaHost for LocalMediaHost {
    async fn upload(&self, path: &Path) -> Result<UploadedAsset> {
        let name = match extension_of(path) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let dest = self.dir.join(&name);
        fs::copy(path, &dest)
            .await
            .with_context(|| format!("copy {} into media dir", path.display()))?;
        debug!("Stored {} as {}", path.display(), dest.display());

        Ok(UploadedAsset {
            url: format!("{}/media/{}", self.public_base, name),
            duration: None,
        })
    }

    async fn delete(&self, url: &str, _kind: AssetKind) -> Result<()> {
        let path = self.file_for(url)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media file {} already gone", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
