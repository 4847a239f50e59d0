//! Scripted gateway shared by the async tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::GatewayError;
use crate::gateway::{ChatSession, GatewayResult, GenerationGateway};
use crate::types::{CodeFile, Idea, IdeaDraft, IdeaExpansion};

/// Four frames of mono 16-bit silence.
pub const SILENT_PITCH: &str = "AAAAAAAAAAA=";

pub fn drafts(count: usize) -> Vec<IdeaDraft> {
    (0..count)
        .map(|i| IdeaDraft {
            name: format!("Agent {i}"),
            description: format!("Agent {i} automates bakery chores"),
            target_audience: "independent bakeries".to_string(),
            monetization: "monthly subscription".to_string(),
            image_prompt: format!("robot baker number {i}"),
        })
        .collect()
}

pub struct ScriptedGateway {
    ideas: Mutex<Vec<IdeaDraft>>,
    failing_images: Mutex<HashSet<String>>,
    fail_expansion: AtomicBool,
    audio: Mutex<Option<String>>,
    gated: AtomicBool,
    gate: Arc<Semaphore>,
    calls: Mutex<HashMap<&'static str, usize>>,
    chat_contexts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(ideas: Vec<IdeaDraft>) -> Self {
        Self {
            ideas: Mutex::new(ideas),
            failing_images: Mutex::new(HashSet::new()),
            fail_expansion: AtomicBool::new(false),
            audio: Mutex::new(Some(SILENT_PITCH.to_string())),
            gated: AtomicBool::new(false),
            gate: Arc::new(Semaphore::new(0)),
            calls: Mutex::new(HashMap::new()),
            chat_contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_image_for(self, image_prompt: &str) -> Self {
        self.failing_images
            .lock()
            .unwrap()
            .insert(image_prompt.to_string());
        self
    }

    /// From now on idea batches and expansions wait for a permit.
    pub fn gate(&self) -> Arc<Semaphore> {
        self.gated.store(true, Ordering::SeqCst);
        Arc::clone(&self.gate)
    }

    pub fn set_ideas(&self, ideas: Vec<IdeaDraft>) {
        *self.ideas.lock().unwrap() = ideas;
    }

    pub fn set_audio(&self, audio: Option<String>) {
        *self.audio.lock().unwrap() = audio;
    }

    pub fn fail_expansions(&self, fail: bool) {
        self.fail_expansion.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn chat_contexts(&self) -> Vec<String> {
        self.chat_contexts.lock().unwrap().clone()
    }

    fn count(&self, op: &'static str) {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
    }

    async fn wait(&self) {
        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate_ideas(&self, _prompt: &str) -> GatewayResult<Vec<IdeaDraft>> {
        self.count("ideas");
        self.wait().await;
        Ok(self.ideas.lock().unwrap().clone())
    }

    async fn generate_image(&self, image_prompt: &str) -> GatewayResult<Option<String>> {
        self.count("image");
        if self.failing_images.lock().unwrap().contains(image_prompt) {
            return Err(GatewayError::Status {
                status: 500,
                message: "image backend unavailable".to_string(),
            });
        }
        Ok(Some(format!("data:image/png;base64,{}", image_prompt.len())))
    }

    async fn expand_idea(&self, idea: &Idea) -> GatewayResult<IdeaExpansion> {
        self.count("expand");
        self.wait().await;
        if self.fail_expansion.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection reset".to_string()));
        }
        Ok(IdeaExpansion {
            mvp_features: vec![format!("{} order intake", idea.name())],
            tech_stack: vec!["Python".to_string(), "FastAPI".to_string()],
            potential_challenges: vec!["data quality".to_string()],
        })
    }

    async fn generate_code_scaffold(&self, _idea: &Idea) -> GatewayResult<Vec<CodeFile>> {
        self.count("scaffold");
        Ok(vec![
            CodeFile {
                file_name: "main.py".to_string(),
                code: "def main():\n    pass\n".to_string(),
            },
            CodeFile {
                file_name: "agent.py".to_string(),
                code: "class Agent:\n    pass\n".to_string(),
            },
        ])
    }

    async fn generate_audio_pitch(&self, _idea: &Idea) -> GatewayResult<Option<String>> {
        self.count("audio");
        Ok(self.audio.lock().unwrap().clone())
    }

    async fn start_chat(&self, idea: &Idea) -> GatewayResult<Box<dyn ChatSession>> {
        self.count("chat");
        self.chat_contexts
            .lock()
            .unwrap()
            .push(crate::gateway::prompts::chat_context(idea));
        Ok(Box::new(ScriptedChat {
            name: idea.name().to_string(),
            turns: 0,
        }))
    }
}

pub struct ScriptedChat {
    name: String,
    turns: usize,
}

#[async_trait]
impl ChatSession for ScriptedChat {
    async fn send(&mut self, message: &str) -> GatewayResult<String> {
        self.turns += 1;
        if message.contains("fail") {
            return Err(GatewayError::Network("chat dropped".to_string()));
        }
        Ok(format!("[{} #{}] {}", self.name, self.turns, message))
    }
}
