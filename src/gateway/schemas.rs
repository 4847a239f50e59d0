//! Response schemas sent to the backend, and the checks applied to what comes
//! back. Structured output is requested, but nothing guarantees the backend
//! honours it, so every response is validated before it reaches the store.

use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::types::{CodeFile, IdeaDraft};

pub fn ideas_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "name": {
                    "type": "STRING",
                    "description": "An inventive, catchy name for the AI agent project."
                },
                "description": {
                    "type": "STRING",
                    "description": "A detailed, persuasive explanation of the idea: the problem it solves and how it works."
                },
                "targetAudience": {
                    "type": "STRING",
                    "description": "A precise description of the target customers or users."
                },
                "monetization": {
                    "type": "STRING",
                    "description": "A clear, plausible strategy for making money from the project."
                },
                "imagePrompt": {
                    "type": "STRING",
                    "description": "A short, visually descriptive prompt in English (5-10 words) for an image generation model, based on the agent's name and description. Example: \"AI agent analyzing viral video trends\"."
                }
            },
            "required": ["name", "description", "targetAudience", "monetization", "imagePrompt"]
        }
    })
}

pub fn expansion_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "mvpFeatures": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "A short list of 3-5 core features for the first version (MVP)."
            },
            "techStack": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "Suggested tech stack: languages, frameworks, key tools."
            },
            "potentialChallenges": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "The 3 most significant technical or business challenges."
            }
        },
        "required": ["mvpFeatures", "techStack", "potentialChallenges"]
    })
}

pub fn code_scaffold_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "files": {
                "type": "ARRAY",
                "description": "An array of objects, where each object represents a code file.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "fileName": {
                            "type": "STRING",
                            "description": "The name of the file (e.g., \"main.py\", \"agent.py\")."
                        },
                        "code": {
                            "type": "STRING",
                            "description": "The full source code content for the file."
                        }
                    },
                    "required": ["fileName", "code"]
                }
            }
        },
        "required": ["files"]
    })
}

fn require_text(value: &str, what: &str, index: usize) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::Malformed(format!(
            "{what} is empty in item {index}"
        )));
    }
    Ok(())
}

/// Parses a JSON text body into `T`, reporting schema mismatches as malformed
/// responses.
pub fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, GatewayError> {
    serde_json::from_str(text.trim())
        .map_err(|err| GatewayError::Malformed(format!("unexpected JSON shape: {err}")))
}

pub fn validate_drafts(drafts: &[IdeaDraft]) -> Result<(), GatewayError> {
    if drafts.is_empty() {
        return Err(GatewayError::Empty("ideas"));
    }
    for (index, draft) in drafts.iter().enumerate() {
        require_text(&draft.name, "name", index)?;
        require_text(&draft.description, "description", index)?;
        require_text(&draft.target_audience, "targetAudience", index)?;
        require_text(&draft.monetization, "monetization", index)?;
        require_text(&draft.image_prompt, "imagePrompt", index)?;
    }
    Ok(())
}

pub fn validate_scaffold(files: &[CodeFile]) -> Result<(), GatewayError> {
    if files.is_empty() {
        return Err(GatewayError::Empty("code files"));
    }
    for (index, file) in files.iter().enumerate() {
        require_text(&file.file_name, "fileName", index)?;
        require_text(&file.code, "code", index)?;
    }
    Ok(())
}
