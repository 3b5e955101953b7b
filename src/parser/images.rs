use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use tracing::debug;

use super::rows::RawRow;
use crate::assets::{upload_with_retry, AssetStore, ImagePayload};
use crate::config::RetryPolicy;
use crate::error::AssetError;

static DATA_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*"data:image/([a-z0-9.+-]+);base64,([^"]+)""#).unwrap()
});

/// Signature and passport photo; anything past these has nowhere to go.
pub const IMAGE_SLOTS: usize = 2;

/// A base64 image found inline in a cell's markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage<'a> {
    pub cell: usize,
    pub subtype: &'a str,
    pub payload: &'a str,
}

impl EmbeddedImage<'_> {
    pub fn decode(&self) -> Result<ImagePayload, AssetError> {
        let compact: String = self.payload.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(ImagePayload {
            subtype: self.subtype.to_ascii_lowercase(),
            bytes: BASE64.decode(compact)?,
        })
    }
}

/// First inline image of each cell, in cell order.
pub fn find_embedded_images<'a>(row: &RawRow<'a>) -> Vec<EmbeddedImage<'a>> {
    row.markup
        .iter()
        .enumerate()
        .filter_map(|(cell, markup)| {
            let caps = DATA_IMG_RE.captures(markup)?;
            Some(EmbeddedImage {
                cell,
                subtype: caps.get(1)?.as_str(),
                payload: caps.get(2)?.as_str(),
            })
        })
        .collect()
}

/// Upload the row's images in document order, stopping once both slots are filled.
pub async fn upload_row_images<S: AssetStore>(
    row: &RawRow<'_>,
    store: &S,
    folder: &str,
    retry: &RetryPolicy,
) -> Result<Vec<String>, AssetError> {
    let images = find_embedded_images(row);
    if images.is_empty() {
        debug!(row = row.ordinal, "no images in row");
    } else if images.len() > IMAGE_SLOTS {
        debug!(
            row = row.ordinal,
            found = images.len(),
            "ignoring images beyond signature and photo"
        );
    }

    let mut urls = Vec::with_capacity(IMAGE_SLOTS);
    for image in images.into_iter().take(IMAGE_SLOTS) {
        let payload = image.decode()?;
        let url = upload_with_retry(store, &payload, folder, retry).await?;
        debug!(row = row.ordinal, cell = image.cell, url = %url, "bound image");
        urls.push(url);
    }
    Ok(urls)
}
