//! Stage B: image download

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use super::http::{self, HttpSettings};
use super::{Extractor, StageOutput};
use crate::config::{ImageConfig, ImageNaming};
use crate::error::ExtractError;
use crate::identity::Identity;
use crate::types::Stage;

/// Extension of the last path segment of `url`
///
/// Only 1-4 ASCII alphanumerics count as an extension; anything else (no dot,
/// an empty or long suffix, an unparseable URL) yields `default`. The query
/// string is never considered. The result is lowercased.
pub fn infer_extension(url: &str, default: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            let segment = u.path_segments()?.next_back()?.to_string();
            let (_, ext) = segment.rsplit_once('.')?;
            let valid = (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
            valid.then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| default.to_string())
}

/// Downloads images into a local directory
#[derive(Clone, Debug)]
pub struct ImageExtractor {
    http: HttpSettings,
    output_dir: PathBuf,
    naming: ImageNaming,
    default_extension: String,
}

impl ImageExtractor {
    /// Create an extractor writing into `config.output_dir`
    pub fn new(http: HttpSettings, config: &ImageConfig) -> Self {
        Self {
            http,
            output_dir: config.output_dir.clone(),
            naming: config.naming,
            default_extension: config.default_extension.trim().to_string(),
        }
    }

    /// Directory images are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn file_stem(&self, bytes: &[u8]) -> String {
        match self.naming {
            ImageNaming::Uuid => uuid::Uuid::new_v4().to_string(),
            ImageNaming::ContentHash => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                format!("{:x}", hasher.finalize())
            }
        }
    }

    /// Write `bytes` under a fresh name and return that name
    ///
    /// Bytes land in a uniquely named `.part` file first and are renamed into
    /// place, so a recorded filename always refers to a complete file.
    async fn store(&self, bytes: &[u8], url: &str) -> Result<String, ExtractError> {
        let extension = infer_extension(url, &self.default_extension);
        let filename = format!("{}.{}", self.file_stem(bytes), extension);
        let final_path = self.output_dir.join(&filename);
        let part_path = self
            .output_dir
            .join(format!(".{}.{}.part", filename, uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&part_path, bytes).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(ExtractError::Output {
                path: part_path,
                reason: e.to_string(),
            });
        }

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(ExtractError::Output {
                path: final_path,
                reason: e.to_string(),
            });
        }

        Ok(filename)
    }
}

#[async_trait]
impl Extractor for ImageExtractor {
    fn stage(&self) -> Stage {
        Stage::Images
    }

    async fn extract(
        &self,
        target: &str,
        identity: &Identity,
    ) -> Result<StageOutput, ExtractError> {
        let client = http::build_client(identity, &self.http)?;
        let response = http::get(&client, target).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::from_reqwest(&e))?;

        if bytes.is_empty() {
            return Err(ExtractError::MissingField {
                field: "image_bytes",
            });
        }

        let image_filename = self.store(&bytes, target).await?;
        tracing::debug!(file = %image_filename, size = bytes.len(), "Stored image");
        Ok(StageOutput::Image { image_filename })
    }
}
