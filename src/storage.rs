use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context};
use tracing::{info, warn};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::{require, Config};
use crate::error::AppError;

const ARCHIVES_DIR: &str = "archives";

/// A zip of a user's training photos, reachable by the fine-tune provider.
#[derive(Debug, Clone)]
pub struct PublishedArchive {
    pub path: PathBuf,
    pub url: String,
    pub photo_count: usize,
}

/// Per-user training photos on local disk plus their published archives.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    photos_dir: PathBuf,
    public_dir: PathBuf,
    public_base_url: String,
    max_photos_per_user: usize,
}

impl PhotoStore {
    pub fn new(config: &Config) -> Self {
        PhotoStore {
            photos_dir: config.photos_dir(),
            public_dir: config.public_dir(),
            public_base_url: config.public_base_url.clone(),
            max_photos_per_user: config.max_photos_per_user,
        }
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    fn user_dir(&self, user_id: i64) -> PathBuf {
        self.photos_dir.join(user_id.to_string())
    }

    /// Stores one uploaded photo and returns its path with the new total.
    pub async fn save_photo(&self, user_id: i64, bytes: &[u8]) -> Result<(PathBuf, usize), AppError> {
        if bytes.is_empty() {
            return Err(AppError::Validation("The uploaded file is empty".to_string()));
        }
        let kind = infer::get(bytes)
            .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
            .ok_or_else(|| AppError::Validation("The uploaded file is not an image".to_string()))?;

        let count = self.count(user_id).await?;
        if count >= self.max_photos_per_user {
            return Err(AppError::Validation(format!(
                "Photo limit reached: at most {} photos per user",
                self.max_photos_per_user
            )));
        }

        let dir = self.user_dir(user_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.{}", Uuid::new_v4().simple(), kind.extension()));
        tokio::fs::write(&path, bytes).await?;
        info!(
            "Stored photo for user {}: {} ({} bytes)",
            user_id,
            path.display(),
            bytes.len()
        );
        Ok((path, count + 1))
    }

    pub async fn count(&self, user_id: i64) -> Result<usize, AppError> {
        Ok(self.list(user_id).await?.len())
    }

    async fn list(&self, user_id: i64) -> Result<Vec<PathBuf>, AppError> {
        let dir = self.user_dir(user_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Zips every stored photo of the user into the public archive directory.
    pub async fn build_archive(&self, user_id: i64) -> Result<PublishedArchive, AppError> {
        let base_url = require(&self.public_base_url, "PUBLIC_BASE_URL")?.to_string();
        let photos = self.list(user_id).await?;
        if photos.is_empty() {
            return Err(AppError::Validation("No photos uploaded".to_string()));
        }

        let archives_dir = self.public_dir.join(ARCHIVES_DIR);
        tokio::fs::create_dir_all(&archives_dir).await?;
        let file_name = format!("{}.zip", Uuid::new_v4());
        let path = archives_dir.join(&file_name);

        let photo_count = photos.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_zip(&target, &photos))
            .await
            .map_err(|err| anyhow!("archive task failed: {err}"))??;

        let url = format!("{base_url}/files/{ARCHIVES_DIR}/{file_name}");
        info!(
            "Published archive for user {} with {} photos at {}",
            user_id, photo_count, url
        );
        Ok(PublishedArchive {
            path,
            url,
            photo_count,
        })
    }

    /// Deletes published archives last modified at least `max_age` ago.
    pub async fn prune_archives(&self, max_age: Duration) -> Result<usize, AppError> {
        let archives_dir = self.public_dir.join(ARCHIVES_DIR);
        let mut entries = match tokio::fs::read_dir(&archives_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|value| value.to_str()) != Some("zip") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to delete archive {}: {err}", path.display()),
            }
        }
        if removed > 0 {
            info!("Deleted {removed} expired training archive(s)");
        }
        Ok(removed)
    }
}

fn write_zip(target: &Path, photos: &[PathBuf]) -> anyhow::Result<()> {
    let file = File::create(target)
        .with_context(|| format!("Failed to create archive {}", target.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut buffer = Vec::new();
    for (index, photo) in photos.iter().enumerate() {
        let extension = photo
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or("jpg");
        zip.start_file(format!("{:03}.{extension}", index + 1), options)?;
        buffer.clear();
        File::open(photo)
            .with_context(|| format!("Failed to open {}", photo.display()))?
            .read_to_end(&mut buffer)?;
        zip.write_all(&buffer)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
pub(crate) const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89,
];
