use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{Error, Result};

/// Called on unrecoverable conditions. If it returns, the failing call
/// reports [`Error::Aborted`] instead of terminating the process.
pub type AbortHandler = fn(&str);

static GLOBAL_CONFIG: OnceLock<CodecConfig> = OnceLock::new();

/// Codec wide switches. One value is shared by every call that reads or
/// writes messages; the process wide default lives in [`global_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Strip trailing spaces from decoded strings.
    pub trim_strings: bool,
    pub debug: bool,
    pub verbose: bool,
    #[serde(skip)]
    pub abort_handler: Option<AbortHandler>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            trim_strings: true,
            debug: false,
            verbose: false,
            abort_handler: None,
        }
    }
}

impl CodecConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn with_abort_handler(mut self, handler: AbortHandler) -> Self {
        self.abort_handler = Some(handler);
        self
    }

    /// Reports an unrecoverable condition through the abort hook.
    pub fn abort(&self, msg: &str) -> Error {
        tracing::error!("{}", msg);
        match self.abort_handler {
            Some(handler) => {
                handler(msg);
                Error::Aborted(msg.to_string())
            }
            None => std::process::abort(),
        }
    }
}

pub fn set_global_config(config: CodecConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn global_config() -> &'static CodecConfig {
    GLOBAL_CONFIG.get_or_init(|| {
        if let Ok(path) = std::env::var("ECBUFR_CONFIG") {
            match CodecConfig::load(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Ignoring config file {}: {}", path, e),
            }
        }
        CodecConfig::default()
    })
}
