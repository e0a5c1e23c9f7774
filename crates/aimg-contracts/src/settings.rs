use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::request::{ImageSize, Sinks, MAX_IMAGE_COUNT};

pub const DEFAULT_SETTINGS_FILE: &str = "aimg.conf";
pub const DEFAULT_OUTPUT: &str = "images/Image.png";
pub const DEFAULT_LOG_FILE: &str = "aimg.log";
pub const DEFAULT_CREATE_MODEL: &str = "dall-e-2";
pub const DEFAULT_VARIATION_MODEL: &str = "dall-e-2";
pub const DEFAULT_THEME: &str = "darkly";
pub const DEFAULT_IMAGE_COUNT: u8 = 2;

/// Persisted defaults for the request form.
///
/// The file is a flat `key=value` list:
/// - blank lines and `#` comments are skipped
/// - an `export ` prefix and matching surrounding quotes are stripped
/// - unknown keys are ignored with a warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub browser: bool,
    pub file: bool,
    pub output: PathBuf,
    pub create_model: String,
    pub variation_model: String,
    /// Carried for the UI; nothing in the request path reads it.
    pub theme: String,
    pub size: ImageSize,
    pub number: u8,
    pub log: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser: false,
            file: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
            create_model: DEFAULT_CREATE_MODEL.to_string(),
            variation_model: DEFAULT_VARIATION_MODEL.to_string(),
            theme: DEFAULT_THEME.to_string(),
            size: ImageSize::default(),
            number: DEFAULT_IMAGE_COUNT,
            log: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl Settings {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "settings file missing; using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", path.display()))
            }
        };
        Self::parse(&content).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut settings = Self::default();
        for (line_no, key, value) in settings_entries(content) {
            match key.as_str() {
                "browser" => settings.browser = parse_flag(&key, &value, line_no)?,
                "file" => settings.file = parse_flag(&key, &value, line_no)?,
                "output" => {
                    if value.is_empty() {
                        bail!("line {line_no}: 'output' must not be empty");
                    }
                    settings.output = PathBuf::from(value);
                }
                "cmodel" => settings.create_model = non_empty(&key, value, line_no)?,
                "vmodel" => settings.variation_model = non_empty(&key, value, line_no)?,
                "theme" => settings.theme = value,
                "size" => {
                    let index = value.parse::<usize>().ok();
                    settings.size = index
                        .and_then(ImageSize::from_settings_index)
                        .with_context(|| {
                            format!("line {line_no}: 'size' must be 0, 1 or 2, got '{value}'")
                        })?;
                }
                "number" => {
                    settings.number = value
                        .parse::<u8>()
                        .ok()
                        .filter(|count| *count <= MAX_IMAGE_COUNT)
                        .with_context(|| {
                            format!(
                                "line {line_no}: 'number' must be between 0 and {MAX_IMAGE_COUNT}, got '{value}'"
                            )
                        })?;
                }
                "log" => settings.log = PathBuf::from(value),
                _ => {
                    tracing::warn!(line = line_no, key = %key, "ignoring unknown settings key");
                }
            }
        }
        Ok(settings)
    }

    pub fn sinks(&self) -> Sinks {
        Sinks {
            browser: self.browser,
            file: self.file,
        }
    }
}

fn settings_entries(content: &str) -> Vec<(usize, String, String)> {
    let mut entries = Vec::new();
    for (idx, raw_line) in content.lines().enumerate() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!(line = idx + 1, "ignoring settings line without '='");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        entries.push((idx + 1, key.to_ascii_lowercase(), unquote(value.trim())));
    }
    entries
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

fn parse_flag(key: &str, value: &str, line_no: usize) -> Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => bail!("line {line_no}: '{key}' must be 0 or 1, got '{value}'"),
    }
}

fn non_empty(key: &str, value: String, line_no: usize) -> Result<String> {
    if value.is_empty() {
        bail!("line {line_no}: '{key}' must not be empty");
    }
    Ok(value)
}
