use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Raw audio to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUpload {
    pub data: Vec<u8>,
    /// File format / extension, e.g. `mp3`
    pub format: String,
}

impl AudioUpload {
    pub fn new(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            data,
            format: format.into(),
        }
    }

    pub fn content_type(&self) -> String {
        get_content_type(&self.format)
    }

    pub fn size_bytes(&self) -> i64 {
        i64::try_from(self.data.len()).unwrap_or(i64::MAX)
    }
}

/// Object storage for recording audio
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Store the audio under `filename` and return a resolvable URL
    async fn upload(&self, filename: &str, audio: &AudioUpload) -> Result<String>;

    /// URL a player can fetch for a stored media location
    async fn playback_url(&self, file_path: &str) -> Result<String>;
}

/// S3 uploader for recording audio
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Single-part upload for small files
    async fn simple_upload(&self, s3_key: &str, filename: &str, audio: &AudioUpload) -> Result<()> {
        let body = ByteStream::from(audio.data.clone());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .body(body)
            .content_type(audio.content_type())
            .metadata("filename", filename)
            .metadata("uploaded-at", Utc::now().to_rfc3339())
            .send()
            .await
            .context("Failed to upload audio to S3")?;

        Ok(())
    }

    /// Multipart upload for large files. A failed part or completion aborts
    /// the upload so no parts are left behind.
    async fn multipart_upload(&self, s3_key: &str, filename: &str, audio: &AudioUpload) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(s3_key)
            .content_type(audio.content_type())
            .metadata("filename", filename)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let result = self.upload_parts(s3_key, upload_id, audio).await;
        abort_on_error(result, move || self.abort_multipart_upload(s3_key, upload_id)).await
    }

    async fn upload_parts(&self, s3_key: &str, upload_id: &str, audio: &AudioUpload) -> Result<()> {
        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        for chunk in audio.data.chunks(self.config.part_size_bytes.max(1)) {
            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(s3_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(s3_key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, s3_key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(s3_key)
            .upload_id(upload_id)
            .send()
            .await
            .context("Failed to abort multipart upload")?;

        debug!(s3_key = %s3_key, "Multipart upload aborted");
        Ok(())
    }

    /// Time-limited GET URL for an object key
    async fn presigned_url(&self, s3_key: &str) -> Result<String> {
        let presigning_config =
            PresigningConfig::expires_in(Duration::from_secs(self.config.presigned_url_expiry_secs))
                .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }

}

#[async_trait]
impl MediaUploader for S3Uploader {
    #[instrument(skip(self, audio), fields(size_bytes = audio.data.len()))]
    async fn upload(&self, filename: &str, audio: &AudioUpload) -> Result<String> {
        let s3_key = object_key(&self.config, filename);

        debug!(s3_key = %s3_key, "Uploading audio to S3");

        if audio.data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(&s3_key, filename, audio).await?;
        } else {
            self.simple_upload(&s3_key, filename, audio).await?;
        }

        let url = public_url(&self.config, &s3_key);

        info!(
            s3_key = %s3_key,
            size_bytes = audio.data.len(),
            "Audio uploaded successfully"
        );

        Ok(url)
    }

    async fn playback_url(&self, file_path: &str) -> Result<String> {
        if !self.config.presign_playback {
            return Ok(file_path.to_string());
        }

        match key_from_url(&self.config, file_path) {
            Some(s3_key) => self.presigned_url(&s3_key).await,
            // Not one of ours; play it from where it is
            None => Ok(file_path.to_string()),
        }
    }
}

/// Run `abort` when `result` failed, keeping the original error
async fn abort_on_error<T, F, Fut>(result: Result<T>, abort: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if result.is_err() {
        if let Err(e) = abort().await {
            warn!(error = %e, "Cleanup after failed upload did not complete");
        }
    }
    result
}

/// Object key for an uploaded file: `{upload_prefix}/{filename}`
pub fn object_key(config: &S3Config, filename: &str) -> String {
    let prefix = config.upload_prefix.trim_matches('/');
    if prefix.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", prefix, filename)
    }
}

/// Publicly resolvable URL of an object key
pub fn public_url(config: &S3Config, s3_key: &str) -> String {
    if let Some(ref base) = config.public_base_url {
        return format!("{}/{}", base.trim_end_matches('/'), s3_key);
    }

    match config.endpoint_url {
        Some(ref endpoint) => format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            config.bucket,
            s3_key
        ),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, s3_key
        ),
    }
}

/// Object key of a URL produced by [`public_url`], if it is one
pub fn key_from_url(config: &S3Config, url: &str) -> Option<String> {
    url.strip_prefix(&public_url(config, ""))
        .filter(|key| !key.is_empty())
        .map(String::from)
}

/// Collision-resistant audio filename:
/// `{prefix}_{unix millis}_{7 random chars}.{format}`
pub fn generate_audio_filename(prefix: &str, format: &str) -> String {
    let prefix = match sanitize_path_component(prefix.trim()) {
        p if p.is_empty() => "recording".to_string(),
        p => p,
    };

    let extension: String = format
        .trim()
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    let extension = if extension.is_empty() {
        "mp3".to_string()
    } else {
        extension
    };

    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(7).collect();

    format!(
        "{}_{}_{}.{}",
        prefix,
        Utc::now().timestamp_millis(),
        suffix,
        extension
    )
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Get content type for an audio format
fn get_content_type(format: &str) -> String {
    match format.trim_start_matches('.').to_lowercase().as_str() {
        "mp3" | "mpeg" => "audio/mpeg".to_string(),
        "wav" => "audio/wav".to_string(),
        "webm" => "audio/webm".to_string(),
        "ogg" | "opus" => "audio/ogg".to_string(),
        "m4a" | "mp4" | "aac" => "audio/mp4".to_string(),
        _ => "audio/mpeg".to_string(),
    }
}
