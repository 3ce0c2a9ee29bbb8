//! Multipart bodies are spooled to the temp dir before being handed to the media host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// A file written to the temp dir. Removed from disk when dropped, whether
/// or not the upload that used it succeeded.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    pub original_name: String,
    pub size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {}: {}", self.path.display(), e),
        }
    }
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, StagedFile>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart, temp_dir: &Path) -> ApiResult<Self> {
        fs::create_dir_all(temp_dir).await.map_err(|e| {
            error!("Failed to create temp dir {}: {}", temp_dir.display(), e);
            ApiError::internal("Failed to stage upload")
        })?;

        let mut form = Self::default();
        while let Some(mut field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            let Some(original_name) = field.file_name().map(str::to_string) else {
                let text = field.text().await?;
                form.fields.insert(name, text);
                continue;
            };

            let path = temp_dir.join(staged_name(&original_name));
            let mut staged = StagedFile {
                path,
                original_name,
                size: 0,
            };
            let mut out = fs::File::create(&staged.path).await.map_err(|e| {
                error!("Failed to create {}: {}", staged.path.display(), e);
                ApiError::internal("Failed to stage upload")
            })?;
            while let Some(chunk) = field.chunk().await? {
                out.write_all(&chunk).await.map_err(|e| {
                    error!("Failed to write {}: {}", staged.path.display(), e);
                    ApiError::internal("Failed to stage upload")
                })?;
                staged.size += chunk.len() as u64;
            }
            out.flush().await.map_err(|e| {
                error!("Failed to flush {}: {}", staged.path.display(), e);
                ApiError::internal("Failed to stage upload")
            })?;

            // An empty file input still arrives as a part; treat it as absent.
            if staged.size > 0 {
                form.files.insert(name, staged);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<StagedFile> {
        self.files.remove(name)
    }
}

fn staged_name(original: &str) -> String {
    let ext = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}
