use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::{Generator, Ulid};

use crate::controller::IdeaStudio;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::ChatSession;
use crate::gateway::prompts::CHAT_OPENING_MESSAGE;
use crate::types::{ChatMessage, ChatRole};

struct ChatThread {
    index: usize,
    idea_name: String,
    session: Box<dyn ChatSession>,
    transcript: Vec<ChatMessage>,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatOpened {
    pub chat_id: String,
    pub index: usize,
    pub idea_name: String,
    pub greeting: ChatMessage,
}

fn message(role: ChatRole, content: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role,
        content: content.into(),
        at: Utc::now().to_rfc3339(),
    }
}

/// Open chats kept before the oldest ones are dropped.
pub const MAX_OPEN_CHATS: usize = 32;

/// Follow-up conversations about single ideas, addressed by chat id.
///
/// A chat captures the idea as it was when the chat started; later enrichments
/// do not reach an open conversation.
pub struct ChatRegistry {
    studio: Arc<IdeaStudio>,
    // monotonic ids, so map order is opening order
    ids: StdMutex<Generator>,
    threads: Mutex<BTreeMap<String, Arc<Mutex<ChatThread>>>>,
    capacity: usize,
}

impl ChatRegistry {
    pub fn new(studio: Arc<IdeaStudio>) -> Self {
        Self::with_capacity(studio, MAX_OPEN_CHATS)
    }

    pub fn with_capacity(studio: Arc<IdeaStudio>, capacity: usize) -> Self {
        Self {
            studio,
            ids: StdMutex::new(Generator::new()),
            threads: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Opens a chat and has the model introduce itself.
    pub async fn start(&self, index: usize) -> ServiceResult<ChatOpened> {
        let idea = self.studio.idea(index).await?;
        let mut session = self.studio.gateway().start_chat(&idea).await?;

        let greeting = match session.send(CHAT_OPENING_MESSAGE).await {
            Ok(reply) => message(ChatRole::Model, reply),
            Err(err) => {
                warn!(index, error = %err, "chat failed to open");
                self.studio
                    .report_error("Could not start a chat session for this idea.")
                    .await;
                return Err(err.into());
            }
        };

        let chat_id = self.next_id();
        let thread = ChatThread {
            index,
            idea_name: idea.name().to_string(),
            session,
            transcript: vec![greeting.clone()],
        };
        let mut threads = self.threads.lock().await;
        threads.insert(chat_id.clone(), Arc::new(Mutex::new(thread)));
        while threads.len() > self.capacity {
            if let Some((evicted, _)) = threads.pop_first() {
                debug!(chat_id = %evicted, "dropping oldest chat");
            }
        }
        drop(threads);
        info!(%chat_id, index, "chat started");

        Ok(ChatOpened {
            chat_id,
            index,
            idea_name: idea.name().to_string(),
            greeting,
        })
    }

    /// Sends one user turn. Blank messages are ignored and return `None`.
    /// A failed turn leaves the transcript as it was.
    pub async fn send(&self, chat_id: &str, text: &str) -> ServiceResult<Option<ChatMessage>> {
        let text = text.trim();
        let thread = self.thread(chat_id).await?;
        if text.is_empty() {
            return Ok(None);
        }

        let mut thread = thread.lock().await;
        let user = message(ChatRole::User, text);
        match thread.session.send(text).await {
            Ok(reply) => {
                let reply = message(ChatRole::Model, reply);
                thread.transcript.push(user);
                thread.transcript.push(reply.clone());
                Ok(Some(reply))
            }
            Err(err) => {
                warn!(%chat_id, index = thread.index, error = %err, "chat turn failed");
                Err(err.into())
            }
        }
    }

    pub async fn transcript(&self, chat_id: &str) -> ServiceResult<(String, Vec<ChatMessage>)> {
        let thread = self.thread(chat_id).await?;
        let thread = thread.lock().await;
        Ok((thread.idea_name.clone(), thread.transcript.clone()))
    }

    pub async fn close(&self, chat_id: &str) -> bool {
        self.threads.lock().await.remove(chat_id).is_some()
    }

    /// Drops every open chat. Used when the ideas they discuss go away.
    pub async fn clear(&self) -> usize {
        let mut threads = self.threads.lock().await;
        let closed = threads.len();
        threads.clear();
        closed
    }

    pub async fn len(&self) -> usize {
        self.threads.lock().await.len()
    }

    fn next_id(&self) -> String {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.generate().unwrap_or_else(|_| Ulid::new()).to_string()
    }

    async fn thread(&self, chat_id: &str) -> ServiceResult<Arc<Mutex<ChatThread>>> {
        self.threads
            .lock()
            .await
            .get(chat_id)
            .cloned()
            .ok_or_else(|| ServiceError::ChatNotFound(chat_id.to_string()))
    }
}
