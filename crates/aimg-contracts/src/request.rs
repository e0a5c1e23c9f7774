use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MAX_IMAGE_COUNT: u8 = 10;
pub const MIN_PROMPT_CHARS: usize = 4;

/// Nominal output dimensions accepted by the remote API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "256x256")]
    S256,
    #[serde(rename = "512x512")]
    S512,
    #[default]
    #[serde(rename = "1024x1024")]
    S1024,
}

impl ImageSize {
    /// Order used by the settings `size` index.
    pub const SETTINGS_ORDER: [ImageSize; 3] = [ImageSize::S1024, ImageSize::S512, ImageSize::S256];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::S256 => "256x256",
            ImageSize::S512 => "512x512",
            ImageSize::S1024 => "1024x1024",
        }
    }

    pub fn from_settings_index(index: usize) -> Option<Self> {
        Self::SETTINGS_ORDER.get(index).copied()
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim().to_ascii_lowercase();
        let edge = match trimmed.split_once('x') {
            Some((w, h)) if w == h => w,
            Some(_) => return Err(format!("image size must be square, got '{raw}'")),
            None => trimmed.as_str(),
        };
        match edge {
            "256" => Ok(ImageSize::S256),
            "512" => Ok(ImageSize::S512),
            "1024" => Ok(ImageSize::S1024),
            _ => Err(format!(
                "unsupported image size '{raw}' (expected 256, 512 or 1024)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    PromptCreate,
    Variation,
}

impl RequestMode {
    /// Label written to the audit log.
    pub fn audit_label(self) -> &'static str {
        match self {
            RequestMode::PromptCreate => "prompt",
            RequestMode::Variation => "variation",
        }
    }
}

/// Output destinations for generated images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sinks {
    pub browser: bool,
    pub file: bool,
}

impl Sinks {
    pub const NONE: Sinks = Sinks {
        browser: false,
        file: false,
    };
    pub const BROWSER: Sinks = Sinks {
        browser: true,
        file: false,
    };
    pub const FILE: Sinks = Sinks {
        browser: false,
        file: true,
    };
    pub const BOTH: Sinks = Sinks {
        browser: true,
        file: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.browser && !self.file
    }
}

/// One user action worth of input. Built fresh, consumed by a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub mode: RequestMode,
    pub prompt: Option<String>,
    pub input_image: Option<PathBuf>,
    pub size: ImageSize,
    pub count: u8,
    pub sinks: Sinks,
    pub output_template: PathBuf,
}

impl RequestDescriptor {
    pub fn prompt_create(prompt: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::PromptCreate,
            prompt: Some(prompt.into()),
            input_image: None,
            size: ImageSize::default(),
            count: 1,
            sinks: Sinks::NONE,
            output_template: PathBuf::from(crate::settings::DEFAULT_OUTPUT),
        }
    }

    pub fn variation(input_image: impl Into<PathBuf>) -> Self {
        Self {
            mode: RequestMode::Variation,
            prompt: None,
            input_image: Some(input_image.into()),
            size: ImageSize::default(),
            count: 1,
            sinks: Sinks::NONE,
            output_template: PathBuf::from(crate::settings::DEFAULT_OUTPUT),
        }
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_count(mut self, count: u8) -> Self {
        self.count = count;
        self
    }

    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_output_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.output_template = template.into();
        self
    }

    /// Prompt text with surrounding whitespace removed.
    pub fn trimmed_prompt(&self) -> &str {
        self.prompt.as_deref().map(str::trim).unwrap_or_default()
    }

    /// Length checked against `MIN_PROMPT_CHARS`: chars of the trimmed prompt,
    /// so `"  ab  "` counts 2.
    pub fn prompt_chars(&self) -> usize {
        self.trimmed_prompt().chars().count()
    }

    /// What the audit log records as the request input.
    pub fn audit_input(&self) -> String {
        match self.mode {
            RequestMode::PromptCreate => self.trimmed_prompt().to_string(),
            RequestMode::Variation => self
                .input_image
                .as_deref()
                .map(|path| path.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

/// A URL handed back by the remote API for one generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImageRef {
    pub url: String,
}

impl GeneratedImageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}
