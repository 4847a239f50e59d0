use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five fields fixed when an idea is generated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdeaDraft {
    pub name: String,
    pub description: String,
    pub target_audience: String,
    pub monetization: String,
    pub image_prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdeaExpansion {
    pub mvp_features: Vec<String>,
    pub tech_stack: Vec<String>,
    pub potential_challenges: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeFile {
    pub file_name: String,
    pub code: String,
}

/// One generated concept plus whatever enrichments it has picked up so far.
///
/// Founding fields are only reachable through [`Idea::founding`]; enrichment
/// fields are written exclusively by the store's compare-and-set merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    #[serde(flatten)]
    founding: IdeaDraft,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expansion: Option<IdeaExpansion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) code_scaffold: Option<Vec<CodeFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) audio_pitch_base64: Option<String>,
    #[serde(default)]
    pub(crate) is_favorite: bool,
}

impl Idea {
    pub fn new(founding: IdeaDraft) -> Self {
        Self {
            founding,
            image_url: None,
            expansion: None,
            code_scaffold: None,
            audio_pitch_base64: None,
            is_favorite: false,
        }
    }

    pub fn with_favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = is_favorite;
        self
    }

    pub fn founding(&self) -> &IdeaDraft {
        &self.founding
    }

    pub fn name(&self) -> &str {
        &self.founding.name
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn expansion(&self) -> Option<&IdeaExpansion> {
        self.expansion.as_ref()
    }

    pub fn code_scaffold(&self) -> Option<&[CodeFile]> {
        self.code_scaffold.as_deref()
    }

    pub fn audio_pitch_base64(&self) -> Option<&str> {
        self.audio_pitch_base64.as_deref()
    }

    pub fn is_favorite(&self) -> bool {
        self.is_favorite
    }

    pub fn has(&self, kind: EnrichmentKind) -> bool {
        match kind {
            EnrichmentKind::Image => self.image_url.is_some(),
            EnrichmentKind::Expansion => self.expansion.is_some(),
            EnrichmentKind::CodeScaffold => self.code_scaffold.is_some(),
            EnrichmentKind::AudioPitch => self.audio_pitch_base64.is_some(),
        }
    }
}

/// Durable projection of an idea: founding fields and the favorite flag only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdea {
    #[serde(flatten)]
    pub founding: IdeaDraft,
    #[serde(default)]
    pub is_favorite: bool,
}

impl From<&Idea> for StoredIdea {
    fn from(idea: &Idea) -> Self {
        Self {
            founding: idea.founding.clone(),
            is_favorite: idea.is_favorite,
        }
    }
}

impl From<StoredIdea> for Idea {
    fn from(stored: StoredIdea) -> Self {
        Idea::new(stored.founding).with_favorite(stored.is_favorite)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EnrichmentKind {
    Image,
    Expansion,
    CodeScaffold,
    AudioPitch,
}

impl EnrichmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentKind::Image => "image",
            EnrichmentKind::Expansion => "expansion",
            EnrichmentKind::CodeScaffold => "code-scaffold",
            EnrichmentKind::AudioPitch => "audio-pitch",
        }
    }
}

impl fmt::Display for EnrichmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single enrichment value to merge into an idea.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdeaPatch {
    Image(String),
    Expansion(IdeaExpansion),
    CodeScaffold(Vec<CodeFile>),
    AudioPitch(String),
}

impl IdeaPatch {
    pub fn kind(&self) -> EnrichmentKind {
        match self {
            IdeaPatch::Image(_) => EnrichmentKind::Image,
            IdeaPatch::Expansion(_) => EnrichmentKind::Expansion,
            IdeaPatch::CodeScaffold(_) => EnrichmentKind::CodeScaffold,
            IdeaPatch::AudioPitch(_) => EnrichmentKind::AudioPitch,
        }
    }
}

/// Compact listing row; leaves out the heavy image and audio payloads.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdeaSummary {
    pub index: usize,
    pub name: String,
    pub description: String,
    pub target_audience: String,
    pub monetization: String,
    pub is_favorite: bool,
    pub has_image: bool,
    pub has_expansion: bool,
    pub has_code_scaffold: bool,
    pub has_audio_pitch: bool,
}

impl IdeaSummary {
    pub fn from_idea(index: usize, idea: &Idea) -> Self {
        let founding = idea.founding();
        Self {
            index,
            name: founding.name.clone(),
            description: founding.description.clone(),
            target_audience: founding.target_audience.clone(),
            monetization: founding.monetization.clone(),
            is_favorite: idea.is_favorite(),
            has_image: idea.has(EnrichmentKind::Image),
            has_expansion: idea.has(EnrichmentKind::Expansion),
            has_code_scaffold: idea.has(EnrichmentKind::CodeScaffold),
            has_audio_pitch: idea.has(EnrichmentKind::AudioPitch),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub at: String,
}
