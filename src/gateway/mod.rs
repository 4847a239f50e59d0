pub mod gemini;
pub mod prompts;
pub mod schemas;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{CodeFile, Idea, IdeaDraft, IdeaExpansion};

pub use gemini::{GeminiConfig, GeminiGateway};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Capabilities the studio needs from a generation backend. Every call may
/// fail independently; callers treat each one as unreliable.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate_ideas(&self, prompt: &str) -> GatewayResult<Vec<IdeaDraft>>;

    /// Returns a `data:` URI, or `None` when the backend produced no image.
    async fn generate_image(&self, image_prompt: &str) -> GatewayResult<Option<String>>;

    async fn expand_idea(&self, idea: &Idea) -> GatewayResult<IdeaExpansion>;

    async fn generate_code_scaffold(&self, idea: &Idea) -> GatewayResult<Vec<CodeFile>>;

    /// Base64 encoded 16-bit PCM at 24 kHz.
    async fn generate_audio_pitch(&self, idea: &Idea) -> GatewayResult<Option<String>>;

    async fn start_chat(&self, idea: &Idea) -> GatewayResult<Box<dyn ChatSession>>;
}

#[async_trait]
pub trait ChatSession: Send {
    async fn send(&mut self, message: &str) -> GatewayResult<String>;
}
