//! Gemini API gateway
//!
//! Talks to the Generative Language REST API with a blocking `ureq` agent.
//! Each call runs on tokio's blocking pool so a slow request only suspends the
//! operation that issued it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::prompts;
use super::schemas::{code_scaffold_schema, expansion_schema, ideas_schema, parse_json};
use super::{ChatSession, GatewayResult, GenerationGateway};
use crate::error::GatewayError;
use crate::types::{CodeFile, Idea, IdeaDraft, IdeaExpansion};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub tts_model: String,
    pub scaffold_model: String,
    pub voice: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            scaffold_model: "gemini-2.5-pro".to_string(),
            voice: "Kore".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }

    fn inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }
}

/// Gemini-backed [`GenerationGateway`].
#[derive(Clone)]
pub struct GeminiGateway {
    agent: ureq::Agent,
    config: Arc<GeminiConfig>,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            agent,
            config: Arc::new(config),
        }
    }

    async fn generate(&self, model: &str, body: Value) -> GatewayResult<GenerateContentResponse> {
        let agent = self.agent.clone();
        let config = Arc::clone(&self.config);
        let model = model.to_string();
        tokio::task::spawn_blocking(move || generate_blocking(&agent, &config, &model, &body))
            .await
            .map_err(|e| GatewayError::Task(format!("spawn_blocking failed: {e}")))?
    }

    async fn generate_json<T: serde::de::DeserializeOwned>(
        &self,
        model: &str,
        system_instruction: &str,
        prompt: String,
        schema: Value,
        extra: Option<Value>,
    ) -> GatewayResult<T> {
        let mut generation_config = json!({
            "responseMimeType": "application/json",
            "responseSchema": schema,
        });
        if let (Some(Value::Object(extra)), Some(target)) = (extra, generation_config.as_object_mut()) {
            target.extend(extra);
        }
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
        });
        let response = self.generate(model, body).await?;
        let text = response.text().ok_or(GatewayError::Empty("text"))?;
        parse_json(&text)
    }
}

fn generate_blocking(
    agent: &ureq::Agent,
    config: &GeminiConfig,
    model: &str,
    body: &Value,
) -> GatewayResult<GenerateContentResponse> {
    let url = format!(
        "{}/models/{}:generateContent",
        config.base_url.trim_end_matches('/'),
        model
    );
    debug!(%model, "calling generateContent");

    let response = agent
        .post(&url)
        .set("x-goog-api-key", &config.api_key)
        .send_json(body)
        .map_err(|err| match err {
            ureq::Error::Status(status, response) => GatewayError::Status {
                status,
                message: response
                    .into_string()
                    .unwrap_or_else(|_| "<unreadable body>".to_string()),
            },
            ureq::Error::Transport(transport) => GatewayError::Network(transport.to_string()),
        })?;

    response
        .into_json::<GenerateContentResponse>()
        .map_err(|e| GatewayError::Malformed(format!("failed to read response: {e}")))
}

#[derive(Deserialize)]
struct ScaffoldEnvelope {
    files: Vec<CodeFile>,
}

#[async_trait]
impl GenerationGateway for GeminiGateway {
    async fn generate_ideas(&self, prompt: &str) -> GatewayResult<Vec<IdeaDraft>> {
        self.generate_json(
            &self.config.text_model,
            prompts::IDEAS_SYSTEM_INSTRUCTION,
            prompts::ideas_prompt(prompt),
            ideas_schema(),
            Some(json!({ "temperature": 0.8, "topP": 0.9 })),
        )
        .await
    }

    async fn generate_image(&self, image_prompt: &str) -> GatewayResult<Option<String>> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompts::image_prompt(image_prompt) }] }],
            "generationConfig": { "responseModalities": ["IMAGE"] },
        });
        let response = self.generate(&self.config.image_model, body).await?;
        Ok(response
            .inline_data()
            .map(|inline| format!("data:{};base64,{}", inline.mime_type, inline.data)))
    }

    async fn expand_idea(&self, idea: &Idea) -> GatewayResult<IdeaExpansion> {
        self.generate_json(
            &self.config.text_model,
            prompts::EXPANSION_SYSTEM_INSTRUCTION,
            prompts::expansion_prompt(idea),
            expansion_schema(),
            None,
        )
        .await
    }

    async fn generate_code_scaffold(&self, idea: &Idea) -> GatewayResult<Vec<CodeFile>> {
        let prompt = prompts::scaffold_prompt(idea).ok_or_else(|| {
            GatewayError::Malformed("idea must be expanded before generating code".to_string())
        })?;
        let envelope: ScaffoldEnvelope = self
            .generate_json(
                &self.config.scaffold_model,
                prompts::SCAFFOLD_SYSTEM_INSTRUCTION,
                prompt,
                code_scaffold_schema(),
                None,
            )
            .await?;
        Ok(envelope.files)
    }

    async fn generate_audio_pitch(&self, idea: &Idea) -> GatewayResult<Option<String>> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompts::pitch_text(idea) }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.config.voice }
                    }
                }
            },
        });
        let response = self.generate(&self.config.tts_model, body).await?;
        Ok(response.inline_data().map(|inline| inline.data.clone()))
    }

    async fn start_chat(&self, idea: &Idea) -> GatewayResult<Box<dyn ChatSession>> {
        Ok(Box::new(GeminiChat {
            gateway: self.clone(),
            system_instruction: prompts::chat_context(idea),
            history: Vec::new(),
        }))
    }
}

/// Multi-turn chat; the full history is resent on every turn.
pub struct GeminiChat {
    gateway: GeminiGateway,
    system_instruction: String,
    history: Vec<Value>,
}

#[async_trait]
impl ChatSession for GeminiChat {
    async fn send(&mut self, message: &str) -> GatewayResult<String> {
        self.history
            .push(json!({ "role": "user", "parts": [{ "text": message }] }));
        let body = json!({
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
            "contents": self.history,
        });
        let model = self.gateway.config.text_model.clone();
        let reply = match self.gateway.generate(&model, body).await {
            Ok(response) => response.text().ok_or(GatewayError::Empty("reply")),
            Err(err) => Err(err),
        };
        match reply {
            Ok(text) => {
                self.history
                    .push(json!({ "role": "model", "parts": [{ "text": text }] }));
                Ok(text)
            }
            Err(err) => {
                // keep history alternating so the next turn is still valid
                self.history.pop();
                Err(err)
            }
        }
    }
}
