use std::future::Future;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{CloudinarySettings, RetryPolicy};
use crate::error::AssetError;

/// Decoded image bytes plus the subtype from the `data:image/<subtype>` URI.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub subtype: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn mime(&self) -> String {
        format!("image/{}", self.subtype)
    }

    fn file_name(&self) -> String {
        let ext = match self.subtype.as_str() {
            "jpeg" => "jpg",
            "svg+xml" => "svg",
            "x-emf" => "emf",
            "x-wmf" => "wmf",
            other => other,
        };
        format!("image.{}", ext)
    }
}

/// Hosted storage for signature and photo images.
pub trait AssetStore {
    /// Store `image` under the `folder` hint and return a stable URL.
    fn upload(
        &self,
        image: &ImagePayload,
        folder: &str,
    ) -> impl Future<Output = Result<String, AssetError>> + Send;
}

pub struct CloudinaryStore {
    client: Client,
    endpoint: String,
    upload_preset: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

fn missing_setting(settings: &CloudinarySettings) -> Option<&'static str> {
    if settings.cloud_name.is_empty() {
        Some("cloudinary.cloud_name")
    } else if settings.upload_preset.is_empty() {
        Some("cloudinary.upload_preset")
    } else {
        None
    }
}

impl CloudinaryStore {
    fn new(client: Client, settings: &CloudinarySettings) -> Self {
        CloudinaryStore {
            client,
            endpoint: format!(
                "{}/{}/image/upload",
                settings.api_base.trim_end_matches('/'),
                settings.cloud_name
            ),
            upload_preset: settings.upload_preset.clone(),
        }
    }
}

/// The configured asset store, or the reason there is none. Rosters without
/// images never touch the store, so a missing setting only fails an upload.
pub enum HostedStore {
    Cloudinary(CloudinaryStore),
    Unconfigured(&'static str),
}

impl HostedStore {
    pub fn from_settings(client: Client, settings: &CloudinarySettings) -> Self {
        match missing_setting(settings) {
            Some(field) => {
                debug!(field, "asset store not configured");
                HostedStore::Unconfigured(field)
            }
            None => HostedStore::Cloudinary(CloudinaryStore::new(client, settings)),
        }
    }
}

impl AssetStore for HostedStore {
    async fn upload(&self, image: &ImagePayload, folder: &str) -> Result<String, AssetError> {
        match self {
            HostedStore::Cloudinary(store) => store.upload(image, folder).await,
            HostedStore::Unconfigured(field) => Err(AssetError::NotConfigured(*field)),
        }
    }
}

impl AssetStore for CloudinaryStore {
    async fn upload(&self, image: &ImagePayload, folder: &str) -> Result<String, AssetError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name())
            .mime_str(&image.mime())?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone())
            .text("folder", folder.to_string());

        let resp = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AssetError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UploadResponse = resp.json().await?;
        let url = parsed.secure_url.ok_or(AssetError::MissingUrl)?;
        debug!(bytes = image.bytes.len(), url = %url, "uploaded image");
        Ok(url)
    }
}

/// Upload with bounded exponential backoff on transient failures.
pub async fn upload_with_retry<S: AssetStore>(
    store: &S,
    image: &ImagePayload,
    folder: &str,
    retry: &RetryPolicy,
) -> Result<String, AssetError> {
    let mut attempt = 0;
    loop {
        match store.upload(image, folder).await {
            Ok(url) => return Ok(url),
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                let backoff = retry.backoff(attempt);
                warn!(
                    "Upload failed (attempt {}/{}): {}, backing off {:.1}s",
                    attempt + 1,
                    retry.max_retries,
                    e,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Hands out `mock://<folder>/<n>` and remembers what it was sent.
    #[derive(Default)]
    pub struct MockStore {
        pub uploads: Mutex<Vec<Vec<u8>>>,
        /// Fail this many calls with a 503 before succeeding.
        pub transient_failures: AtomicUsize,
        /// Reject every call with this status.
        pub reject_with: Option<u16>,
    }

    impl MockStore {
        pub fn failing(status: u16) -> Self {
            MockStore {
                reject_with: Some(status),
                ..MockStore::default()
            }
        }

        pub fn flaky(failures: usize) -> Self {
            MockStore {
                transient_failures: AtomicUsize::new(failures),
                ..MockStore::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    impl AssetStore for MockStore {
        async fn upload(&self, image: &ImagePayload, folder: &str) -> Result<String, AssetError> {
            let n = {
                let mut uploads = self.uploads.lock().unwrap();
                uploads.push(image.bytes.clone());
                uploads.len()
            };
            if let Some(status) = self.reject_with {
                return Err(AssetError::Rejected {
                    status,
                    body: "mock".into(),
                });
            }
            let left = self.transient_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.transient_failures.store(left - 1, Ordering::SeqCst);
                return Err(AssetError::Rejected {
                    status: 503,
                    body: "busy".into(),
                });
            }
            Ok(format!("mock://{}/{}", folder, n))
        }
    }
}
