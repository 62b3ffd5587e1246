//! Format-agnostic loading of configuration files

use crate::{Error, NormalizedPath, Result, io};
use serde::de::DeserializeOwned;

/// Supported on-disk formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Extensions probed by [`ConfigStore::load_first`], in priority order.
    pub const EXTENSIONS: [&'static str; 4] = ["toml", "json", "yaml", "yml"];

    pub fn from_path(path: &NormalizedPath) -> Result<Self> {
        let extension = path.extension().unwrap_or("");
        match extension.to_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(Error::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
        }
    }

    fn parse<T: DeserializeOwned>(self, content: &str) -> std::result::Result<T, String> {
        match self {
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// Format-agnostic configuration reader.
///
/// Detects the format from the file extension and deserializes
/// transparently.
#[derive(Debug, Default)]
pub struct ConfigStore;

impl ConfigStore {
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a file.
    pub fn load<T: DeserializeOwned>(&self, path: &NormalizedPath) -> Result<T> {
        let format = ConfigFormat::from_path(path)?;
        let content = io::read_text(path)?;
        format.parse(&content).map_err(|message| Error::ConfigParse {
            path: path.to_native(),
            format: format.name().into(),
            message,
        })
    }

    /// Load `<stem>.<ext>` for the first extension in
    /// [`ConfigFormat::EXTENSIONS`] that exists.
    ///
    /// Returns `Ok(None)` when no candidate file exists.
    pub fn load_first<T: DeserializeOwned>(&self, stem: &NormalizedPath) -> Result<Option<T>> {
        for ext in ConfigFormat::EXTENSIONS {
            let candidate = NormalizedPath::new(format!("{}.{}", stem, ext));
            if candidate.is_file() {
                tracing::debug!(path = %candidate, "loading configuration");
                return self.load(&candidate).map(Some);
            }
        }
        Ok(None)
    }
}
