use std::path::PathBuf;
use std::sync::Arc;

use rmcp::RoleServer;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::audio::{PlaybackController, PlaybackOutcome};
use crate::chat::ChatRegistry;
use crate::controller::{IdeaStudio, Outcome};
use crate::error::ServiceError;
use crate::export::{export_file_name, export_markdown, write_export};

const IDEAS_RESOURCE_URI: &str = "ideas://current";
const FAVORITES_RESOURCE_URI: &str = "ideas://favorites";

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct GenerateIdeasArgs {
    /// Business, field or problem to brainstorm AI agents for
    pub prompt: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct IdeaIndexArgs {
    /// Zero-based position in the current idea list
    pub index: usize,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ListIdeasArgs {
    #[serde(default, rename = "favoritesOnly")]
    pub favorites_only: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct GetIdeaArgs {
    pub index: usize,
    /// Include the image data URI and the base64 audio pitch
    #[serde(default, rename = "includeMedia")]
    pub include_media: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ExportIdeaArgs {
    pub index: usize,
    /// Directory to write the Markdown file into; returned inline when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct SendChatArgs {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ChatIdArgs {
    #[serde(rename = "chatId")]
    pub chat_id: String,
}

fn json_result(value: Value) -> Result<CallToolResult, ErrorData> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn to_value(value: impl Serialize) -> Result<Value, ErrorData> {
    serde_json::to_value(value).map_err(|e| ErrorData::internal_error(e.to_string(), None))
}

fn outcome_result<T: Serialize>(outcome: Outcome<T>, key: &str) -> Result<CallToolResult, ErrorData> {
    match outcome {
        Outcome::Done(value) => json_result(json!({ "status": "done", key: to_value(value)? })),
        Outcome::Skipped(reason) => json_result(json!({ "status": "skipped", "skip": to_value(reason)? })),
    }
}

/// Shared by every MCP session; one idea collection per process.
pub struct StudioContext {
    pub studio: Arc<IdeaStudio>,
    pub playback: PlaybackController,
    pub chats: ChatRegistry,
    pub instructions: String,
}

#[derive(Clone)]
pub struct IdeaStudioServer {
    context: Arc<StudioContext>,
    pub tool_router: ToolRouter<IdeaStudioServer>,
}

#[tool_router]
impl IdeaStudioServer {
    pub fn new(context: Arc<StudioContext>) -> Self {
        Self {
            context,
            tool_router: Self::tool_router(),
        }
    }

    fn studio(&self) -> &IdeaStudio {
        &self.context.studio
    }

    #[tool(description = "Generate four AI agent business ideas for a business, field or problem. Replaces the current list.")]
    async fn generate_ideas(
        &self,
        Parameters(args): Parameters<GenerateIdeasArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        match self.studio().generate_ideas(&args.prompt).await? {
            Outcome::Done(report) => json_result(json!({
                "status": "done",
                "report": to_value(report)?,
                "ideas": to_value(self.studio().summaries(false).await)?,
            })),
            Outcome::Skipped(reason) => json_result(json!({ "status": "skipped", "skip": to_value(reason)? })),
        }
    }

    #[tool(description = "List the current ideas, optionally only favorites")]
    async fn list_ideas(
        &self,
        Parameters(args): Parameters<ListIdeasArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let ideas = self.studio().summaries(args.favorites_only).await;
        json_result(json!({ "ideas": to_value(ideas)? }))
    }

    #[tool(description = "Show one idea with all of its enrichments")]
    async fn get_idea(
        &self,
        Parameters(args): Parameters<GetIdeaArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let idea = self.studio().idea(args.index).await?;
        let mut value = to_value(&idea)?;
        if !args.include_media {
            if let Some(obj) = value.as_object_mut() {
                for key in ["imageUrl", "audioPitchBase64"] {
                    if obj.remove(key).is_some() {
                        obj.insert(format!("{key}Available"), Value::Bool(true));
                    }
                }
            }
        }
        json_result(json!({ "index": args.index, "idea": value }))
    }

    #[tool(description = "Load the concept image for an idea that has none")]
    async fn generate_image(
        &self,
        Parameters(args): Parameters<IdeaIndexArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self.studio().generate_image(args.index).await?;
        let loaded = match outcome {
            Outcome::Done(url) => Outcome::Done(url.is_some()),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        };
        outcome_result(loaded, "loaded")
    }

    #[tool(description = "Expand an idea into a plan: MVP features, tech stack and potential challenges")]
    async fn expand_idea(
        &self,
        Parameters(args): Parameters<IdeaIndexArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self.studio().expand_idea(args.index).await?;
        outcome_result(outcome, "expansion")
    }

    #[tool(description = "Generate a starter Python code scaffold for an expanded idea")]
    async fn generate_code_scaffold(
        &self,
        Parameters(args): Parameters<IdeaIndexArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self.studio().generate_code_scaffold(args.index).await?;
        outcome_result(outcome, "files")
    }

    #[tool(description = "Play the spoken pitch for an idea, generating it if needed. Calling it for the idea that is playing stops it.")]
    async fn play_pitch(
        &self,
        Parameters(args): Parameters<IdeaIndexArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let value = match self.context.playback.play_or_toggle(args.index).await? {
            PlaybackOutcome::Started { index } => json!({ "status": "playing", "index": index }),
            PlaybackOutcome::Stopped { index } => json!({ "status": "stopped", "index": index }),
            PlaybackOutcome::Skipped(reason) => json!({ "status": "skipped", "skip": to_value(reason)? }),
        };
        json_result(value)
    }

    #[tool(description = "Stop the pitch that is playing, if any")]
    async fn stop_pitch(&self) -> Result<CallToolResult, ErrorData> {
        let stopped = self.context.playback.stop();
        json_result(json!({ "stopped": stopped }))
    }

    #[tool(description = "Mark or unmark an idea as a favorite")]
    async fn toggle_favorite(
        &self,
        Parameters(args): Parameters<IdeaIndexArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self.studio().toggle_favorite(args.index).await?;
        outcome_result(outcome, "isFavorite")
    }

    #[tool(description = "Delete every idea and the saved copy")]
    async fn clear_ideas(&self) -> Result<CallToolResult, ErrorData> {
        self.context.playback.stop();
        self.studio().clear_all().await;
        let closed_chats = self.context.chats.clear().await;
        json_result(json!({ "status": "cleared", "closedChats": closed_chats }))
    }

    #[tool(description = "Export an idea as Markdown, inline or into a directory")]
    async fn export_idea(
        &self,
        Parameters(args): Parameters<ExportIdeaArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let idea = self.studio().idea(args.index).await?;
        match args.directory {
            Some(directory) => {
                let path = write_export(&idea, &PathBuf::from(directory))?;
                info!(path = %path.display(), "exported idea");
                json_result(json!({ "path": path.display().to_string() }))
            }
            None => json_result(json!({
                "fileName": export_file_name(idea.name()),
                "markdown": export_markdown(&idea),
            })),
        }
    }

    #[tool(description = "Start a follow-up chat about an idea; the model introduces itself first")]
    async fn start_chat(
        &self,
        Parameters(args): Parameters<IdeaIndexArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let opened = self.context.chats.start(args.index).await?;
        json_result(to_value(opened)?)
    }

    #[tool(description = "Send a message in a chat started with start_chat")]
    async fn send_chat(
        &self,
        Parameters(args): Parameters<SendChatArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        match self.context.chats.send(&args.chat_id, &args.message).await? {
            Some(reply) => json_result(json!({ "reply": to_value(reply)? })),
            None => json_result(json!({ "status": "skipped", "skip": { "reason": "empty-message" } })),
        }
    }

    #[tool(description = "Show the full transcript of a chat")]
    async fn chat_transcript(
        &self,
        Parameters(args): Parameters<ChatIdArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let (idea_name, messages) = self.context.chats.transcript(&args.chat_id).await?;
        json_result(json!({ "ideaName": idea_name, "messages": to_value(messages)? }))
    }

    #[tool(description = "Close a chat and forget its transcript")]
    async fn close_chat(
        &self,
        Parameters(args): Parameters<ChatIdArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let closed = self.context.chats.close(&args.chat_id).await;
        json_result(json!({ "closed": closed }))
    }

    #[tool(description = "Show pending work, counts, the playing pitch and the last error")]
    async fn studio_status(&self) -> Result<CallToolResult, ErrorData> {
        let status = self.studio().status().await;
        json_result(json!({
            "studio": to_value(status)?,
            "playing": self.context.playback.currently_playing(),
            "openChats": self.context.chats.len().await,
        }))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for IdeaStudioServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(self.context.instructions.clone()),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _ctx: rmcp::service::RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult {
            resources: vec![
                RawResource::new(IDEAS_RESOURCE_URI, "Current Ideas").no_annotation(),
                RawResource::new(FAVORITES_RESOURCE_URI, "Favorite Ideas").no_annotation(),
            ],
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri, .. }: ReadResourceRequestParam,
        _ctx: rmcp::service::RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let favorites_only = match uri.as_str() {
            IDEAS_RESOURCE_URI => false,
            FAVORITES_RESOURCE_URI => true,
            _ => {
                return Err(ErrorData::resource_not_found(
                    "Unknown resource URI",
                    Some(json!({ "uri": uri })),
                ));
            }
        };
        let ideas = self.studio().summaries(favorites_only).await;
        let text = serde_json::to_string_pretty(&ideas).map_err(ServiceError::from)?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _ctx: rmcp::service::RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: Vec::new(),
            meta: None,
        })
    }
}
