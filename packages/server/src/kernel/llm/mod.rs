// Provider Gateway - the capability set through which the engine talks to an
// LLM back-end.
//
// These are INFRASTRUCTURE traits only - no business logic. Pipelines decide
// what to do with the artifacts; implementations decide how to produce them.
// Every call site goes through the retry/timeout executor, so implementations
// are free to fail with any error.

mod anthropic;
mod dev;

pub use anthropic::AnthropicProvider;
pub use dev::DevProvider;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Request / response shapes
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SpellRequest {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpellResult {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentRequest {
    pub query: String,
    pub language: String,
    pub filetype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIntent {
    pub intent: String,
    pub title: String,
    pub summary: String,
}

/// 1..5 intents, deduplicated case-insensitively by intent text.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentResolution {
    pub items: Vec<ResolvedIntent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleRequest {
    pub query: String,
    pub intent: String,
    pub language: String,
    pub filetype: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub slug: String,
    pub content: String,
    #[serde(rename = "generatedBy")]
    pub generated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleResult {
    pub article: ArticleDraft,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub description: String,
    pub quality: ImageQuality,
}

#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// One message of mail history handed to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeRequest {
    pub messages: Vec<MailMessage>,
}

/// Contract: at most ~350 words.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadSummary {
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPolicy {
    pub max_count: u32,
    pub max_text_chars: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyRequest {
    pub history: Vec<MailMessage>,
    pub summary: Option<String>,
    pub user_input: String,
    pub attachment_policy: AttachmentPolicy,
    pub model: Option<String>,
}

/// Attachment the provider asks the engine to materialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DraftAttachment {
    Text {
        #[serde(rename = "fileName")]
        file_name: String,
        content: String,
    },
    Image {
        description: String,
        quality: ImageQuality,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyDraft {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<DraftAttachment>,
}

// =============================================================================
// The capability set
// =============================================================================

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier recorded on failure rows.
    fn name(&self) -> &'static str;

    async fn correct_spelling(&self, req: SpellRequest) -> Result<SpellResult>;

    async fn resolve_intent(&self, req: IntentRequest) -> Result<IntentResolution>;

    async fn create_article(&self, req: ArticleRequest) -> Result<ArticleResult>;

    async fn create_image(&self, req: ImageRequest) -> Result<ImageArtifact>;

    async fn summarize(&self, req: SummarizeRequest) -> Result<ThreadSummary>;

    async fn generate_reply(&self, req: ReplyRequest) -> Result<ReplyDraft>;
}

/// Dedupe resolved intents case-insensitively by intent text, capped at 5.
///
/// Both implementations funnel their parse output through this so the
/// 1..5-deduped contract holds regardless of what the model returned.
pub(crate) fn normalize_intents(items: Vec<ResolvedIntent>) -> Vec<ResolvedIntent> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for item in items {
        let key = item.intent.trim().to_lowercase();
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(item);
        if out.len() == 5 {
            break;
        }
    }
    out
}
