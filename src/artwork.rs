use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use image::RgbaImage;

use crate::client::ServerClient;
use crate::compositor::{self, ARTWORK_SIZE};

/// Turns an artwork URL from the metadata into pixels
#[async_trait(?Send)]
pub trait ArtworkLoader {
    async fn load(&self, url: &str) -> Result<RgbaImage>;
}

/// Loads artwork from `data:` URLs in place, everything else over HTTP
pub struct HttpArtworkLoader {
    client: ServerClient,
}

impl HttpArtworkLoader {
    pub fn new(client: ServerClient) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl ArtworkLoader for HttpArtworkLoader {
    async fn load(&self, url: &str) -> Result<RgbaImage> {
        let bytes = if url.starts_with("data:") {
            decode_data_url(url)?
        } else {
            self.client
                .fetch_bytes(url)
                .await
                .with_context(|| format!("Failed to download artwork {}", url))?
        };

        compositor::decode_artwork(&bytes, ARTWORK_SIZE)
    }
}

/// Decode the payload of a base64 `data:` URL
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let base64_data = url
        .split_once(',')
        .map(|(_, data)| data)
        .context("Invalid data URL format")?;

    base64::engine::general_purpose::STANDARD
        .decode(base64_data.trim())
        .context("Failed to decode base64 artwork")
}
