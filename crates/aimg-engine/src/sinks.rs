use std::io;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;

use crate::error::truncate_text;

/// Opens a URL for the user to look at.
pub trait BrowserOpener {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// The platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

/// Downloads the bytes behind a generated image URL.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct HttpFetcher {
    http: HttpClient,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading image ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(download_error(status, &body));
        }
        let bytes = response
            .bytes()
            .context("failed reading image bytes")?
            .to_vec();
        Ok(bytes)
    }
}

fn download_error(status: StatusCode, body: &str) -> anyhow::Error {
    anyhow!(
        "image download failed ({}): {}",
        status.as_u16(),
        truncate_text(body.trim(), 256)
    )
}
