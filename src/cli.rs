use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::StorageError;
use crate::gateway::GeminiConfig;
use crate::gateway::gemini::DEFAULT_BASE_URL;
use crate::metadata::{PKG_DESCRIPTION, PKG_NAME, PKG_VERSION};
use crate::storage::default_storage_path;

#[derive(Parser, Debug, Clone)]
#[command(name = PKG_NAME)]
#[command(version = PKG_VERSION)]
#[command(about = PKG_DESCRIPTION, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the MCP server
    Start(CommandArguments),
    /// Show the resolved configuration and the saved idea count
    Status(CommandArguments),
    /// Erase the saved ideas
    Clear(CommandArguments),
    /// Print version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct CommandArguments {
    /// Enable stdio transport
    #[arg(long, env = "IDEAS_ENABLE_STDIO", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_stdio: bool,

    /// Enable streamable HTTP transport
    #[arg(long, env = "IDEAS_ENABLE_HTTP", default_value_t = false, action = clap::ArgAction::Set)]
    pub enable_http: bool,

    /// Streamable HTTP bind address
    #[arg(long, env = "IDEAS_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub http_addr: String,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Generative Language API base URL
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub gemini_base_url: String,

    /// Model for ideas, expansions and chat
    #[arg(long, env = "IDEAS_TEXT_MODEL", default_value = "gemini-2.5-flash")]
    pub text_model: String,

    /// Model for concept images
    #[arg(long, env = "IDEAS_IMAGE_MODEL", default_value = "gemini-2.5-flash-image")]
    pub image_model: String,

    /// Text-to-speech model for audio pitches
    #[arg(long, env = "IDEAS_TTS_MODEL", default_value = "gemini-2.5-flash-preview-tts")]
    pub tts_model: String,

    /// Model for code scaffolds
    #[arg(long, env = "IDEAS_SCAFFOLD_MODEL", default_value = "gemini-2.5-pro")]
    pub scaffold_model: String,

    /// Prebuilt voice for audio pitches
    #[arg(long, env = "IDEAS_VOICE", default_value = "Kore")]
    pub voice: String,

    /// Per-request timeout for the generation API, in seconds
    #[arg(long, env = "IDEAS_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Storage file for saved ideas (defaults to ~/.agent-ideas/storage.json)
    #[arg(long, env = "IDEAS_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Keep ideas in memory only
    #[arg(long, env = "IDEAS_EPHEMERAL", default_value_t = false)]
    pub ephemeral: bool,
}

impl CommandArguments {
    pub fn default_settings() -> Self {
        Self {
            enable_stdio: true,
            enable_http: false,
            http_addr: "127.0.0.1:8080".to_string(),
            gemini_api_key: None,
            gemini_base_url: DEFAULT_BASE_URL.to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            scaffold_model: "gemini-2.5-pro".to_string(),
            voice: "Kore".to_string(),
            request_timeout_secs: 120,
            storage_path: None,
            ephemeral: false,
        }
    }

    /// Validate CLI/environment-derived arguments.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enable_stdio && !self.enable_http {
            return Err("Enable at least one transport (stdio or http)".to_string());
        }
        if self.enable_http {
            self.http_addr
                .parse::<SocketAddr>()
                .map_err(|e| format!("Invalid IDEAS_HTTP_ADDR '{}': {e}", self.http_addr))?;
        }
        if self.request_timeout_secs == 0 {
            return Err("IDEAS_REQUEST_TIMEOUT_SECS must be greater than zero".to_string());
        }
        for (name, value) in [
            ("IDEAS_TEXT_MODEL", &self.text_model),
            ("IDEAS_IMAGE_MODEL", &self.image_model),
            ("IDEAS_TTS_MODEL", &self.tts_model),
            ("IDEAS_SCAFFOLD_MODEL", &self.scaffold_model),
            ("IDEAS_VOICE", &self.voice),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} cannot be empty"));
            }
        }
        Ok(())
    }

    pub fn gemini_config(&self) -> Result<GeminiConfig, String> {
        let api_key = self
            .gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| "GEMINI_API_KEY is not set".to_string())?;
        Ok(GeminiConfig {
            base_url: self.gemini_base_url.clone(),
            text_model: self.text_model.clone(),
            image_model: self.image_model.clone(),
            tts_model: self.tts_model.clone(),
            scaffold_model: self.scaffold_model.clone(),
            voice: self.voice.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..GeminiConfig::new(api_key)
        })
    }

    pub fn resolved_storage_path(&self) -> Result<PathBuf, StorageError> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => default_storage_path(),
        }
    }
}
