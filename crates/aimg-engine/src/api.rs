use std::env;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::StatusCode;
use serde_json::{json, Value};

use aimg_contracts::request::{GeneratedImageRef, ImageSize};

use crate::credentials::ApiKey;
use crate::error::truncate_text;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCall {
    pub model: String,
    pub prompt: String,
    pub n: u8,
    pub size: ImageSize,
}

#[derive(Clone, PartialEq, Eq)]
pub struct VariationCall {
    pub model: String,
    pub image: Vec<u8>,
    pub file_name: String,
    pub n: u8,
    pub size: ImageSize,
}

impl std::fmt::Debug for VariationCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariationCall")
            .field("model", &self.model)
            .field("image_bytes", &self.image.len())
            .field("file_name", &self.file_name)
            .field("n", &self.n)
            .field("size", &self.size)
            .finish()
    }
}

/// The remote image service. Each call is one blocking round trip.
pub trait ImageApi {
    fn generate(&self, key: &ApiKey, call: &GenerateCall) -> Result<Vec<GeneratedImageRef>>;
    fn create_variation(
        &self,
        key: &ApiKey,
        call: &VariationCall,
    ) -> Result<Vec<GeneratedImageRef>>;
}

pub struct OpenAiImageApi {
    api_base: String,
    http: HttpClient,
}

impl Default for OpenAiImageApi {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiImageApi {
    pub fn new() -> Self {
        Self::with_base(
            env::var("OPENAI_API_BASE")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        )
    }

    pub fn with_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    fn post_json(&self, endpoint: &str, key: &ApiKey, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(key.expose())
            .json(payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        response_json_or_error("OpenAI", response)
    }
}

impl ImageApi for OpenAiImageApi {
    fn generate(&self, key: &ApiKey, call: &GenerateCall) -> Result<Vec<GeneratedImageRef>> {
        let endpoint = self.endpoint("images/generations");
        let payload = json!({
            "model": call.model,
            "prompt": call.prompt,
            "n": call.n,
            "size": call.size.as_str(),
        });
        tracing::debug!(endpoint = %endpoint, model = %call.model, n = call.n, size = %call.size, "requesting generations");
        let response_payload = self.post_json(&endpoint, key, &payload)?;
        extract_image_refs(&response_payload)
    }

    fn create_variation(
        &self,
        key: &ApiKey,
        call: &VariationCall,
    ) -> Result<Vec<GeneratedImageRef>> {
        let endpoint = self.endpoint("images/variations");
        let form = variation_form(call)?;
        tracing::debug!(endpoint = %endpoint, model = %call.model, n = call.n, size = %call.size, bytes = call.image.len(), "requesting variations");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(key.expose())
            .multipart(form)
            .send()
            .context("OpenAI variations request failed")?;
        let response_payload = response_json_or_error("OpenAI variations", response)?;
        extract_image_refs(&response_payload)
    }
}

fn variation_form(call: &VariationCall) -> Result<MultipartForm> {
    let part = MultipartPart::bytes(call.image.clone())
        .file_name(call.file_name.clone())
        .mime_str("image/png")
        .context("invalid mime for variation image")?;
    let form = variation_fields(call)
        .into_iter()
        .fold(MultipartForm::new(), |form, (name, value)| form.text(name, value));
    Ok(form.part("image", part))
}

/// Text fields sent alongside the `image` part.
fn variation_fields(call: &VariationCall) -> [(&'static str, String); 3] {
    [
        ("model", call.model.clone()),
        ("n", call.n.to_string()),
        ("size", call.size.as_str().to_string()),
    ]
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    parse_response_body(provider, status, &body)
}

/// Non-2xx bodies are reduced to `/error/message` when the API sent one.
fn parse_response_body(provider: &str, status: StatusCode, body: &str) -> Result<Value> {
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|payload| {
                payload
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.trim().to_string());
        bail!(
            "{provider} request failed ({}): {}",
            status.as_u16(),
            truncate_text(&message, 512)
        );
    }
    serde_json::from_str(body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

/// Collects `data[].url`; rows without a URL are skipped.
fn extract_image_refs(response_payload: &Value) -> Result<Vec<GeneratedImageRef>> {
    let Some(rows) = response_payload.get("data").and_then(Value::as_array) else {
        bail!("OpenAI response has no 'data' array");
    };
    let mut out = Vec::new();
    for row in rows {
        match row.get("url").and_then(Value::as_str) {
            Some(url) if !url.trim().is_empty() => out.push(GeneratedImageRef::new(url)),
            _ => tracing::warn!("skipping OpenAI image row without a url"),
        }
    }
    Ok(out)
}
