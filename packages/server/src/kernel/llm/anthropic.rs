// Anthropic implementation of the Provider Gateway using rig.
//
// Prompt construction lives here; what to do with the artifacts is the
// pipelines' business. Every method returns raw structured data parsed from
// the model's JSON output.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::anthropic;
use serde::de::DeserializeOwned;

use super::{
    normalize_intents, ArticleRequest, ArticleResult, ImageArtifact, ImageRequest,
    IntentRequest, IntentResolution, LlmProvider, ReplyDraft, ReplyRequest, SpellRequest,
    SpellResult, SummarizeRequest, ThreadSummary,
};

/// Upper bound on corrected query text.
const SPELL_RESULT_MAX_CHARS: usize = 500;

pub struct AnthropicProvider {
    client: anthropic::Client,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, default_model: impl Into<String>) -> Self {
        let client = anthropic::ClientBuilder::new(api_key).build();
        Self {
            client,
            default_model: default_model.into(),
        }
    }

    /// Run one completion and parse the response as JSON.
    ///
    /// The JSON-only instructions are appended to every prompt; models still
    /// occasionally wrap output in markdown fences, so those are stripped
    /// before parsing. Transport and parse errors both bubble up to the
    /// retry executor.
    async fn complete_json<T: DeserializeOwned>(
        &self,
        model: Option<&str>,
        preamble: &str,
        user: &str,
    ) -> Result<T> {
        let model = model.unwrap_or(&self.default_model);
        let agent = self
            .client
            .agent(model)
            .preamble(preamble)
            .max_tokens(4096)
            .build();

        let prompt = format!(
            "{user}\n\n\
             CRITICAL: Your response will be parsed directly by a JSON parser.\n\
             Start with {{ or [ immediately, end with }} or ] immediately.\n\
             No markdown fences, no commentary, valid JSON only."
        );

        let response = agent
            .prompt(prompt.as_str())
            .await
            .context("Failed to call Anthropic API")?;

        let cleaned = strip_fences(&response);
        serde_json::from_str(cleaned).with_context(|| {
            format!(
                "failed to parse model output as JSON: {}",
                cleaned.chars().take(200).collect::<String>()
            )
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn correct_spelling(&self, req: SpellRequest) -> Result<SpellResult> {
        let mut result: SpellResult = self
            .complete_json(
                None,
                "You correct spelling mistakes in search queries without changing their meaning.",
                &format!(
                    "Correct the spelling of this search query (language: {}). \
                     Keep operators like filetype:xxx untouched. \
                     Respond as {{\"text\": \"...\"}}.\n\nQuery: {}",
                    req.language, req.text
                ),
            )
            .await?;
        result.text = result.text.chars().take(SPELL_RESULT_MAX_CHARS).collect();
        Ok(result)
    }

    async fn resolve_intent(&self, req: IntentRequest) -> Result<IntentResolution> {
        let mut resolution: IntentResolution = self
            .complete_json(
                None,
                "You break a search query into the distinct user intents behind it.",
                &format!(
                    "Query: {}\nLanguage: {}\nTarget filetype: {}\n\n\
                     Produce 1 to 5 distinct intents as \
                     {{\"items\": [{{\"intent\": \"...\", \"title\": \"...\", \"summary\": \"...\"}}]}}.",
                    req.query, req.language, req.filetype
                ),
            )
            .await?;
        resolution.items = normalize_intents(resolution.items);
        if resolution.items.is_empty() {
            anyhow::bail!("provider returned no usable intents");
        }
        Ok(resolution)
    }

    async fn create_article(&self, req: ArticleRequest) -> Result<ArticleResult> {
        self.complete_json(
            None,
            "You write complete reference articles for a self-hosted search service.",
            &format!(
                "Query: {}\nIntent: {}\nLanguage: {}\nFiletype: {}\n\n\
                 Write the full article and 1 to 3 related recommendations as \
                 {{\"article\": {{\"title\": \"...\", \"slug\": \"kebab-case.{}\", \
                 \"content\": \"...\", \"generatedBy\": \"model-name\"}}, \
                 \"recommendations\": [{{\"title\": \"...\", \"summary\": \"...\"}}]}}.",
                req.query, req.intent, req.language, req.filetype, req.filetype
            ),
        )
        .await
    }

    async fn create_image(&self, req: ImageRequest) -> Result<ImageArtifact> {
        // Text models draw with SVG. Quality maps to how much detail we ask for.
        let detail = match req.quality {
            super::ImageQuality::Low => "a minimal, flat",
            super::ImageQuality::Normal => "a clean, detailed",
            super::ImageQuality::High => "an intricate, richly detailed",
        };
        let response: serde_json::Value = self
            .complete_json(
                None,
                "You produce standalone SVG illustrations.",
                &format!(
                    "Draw {detail} SVG illustration of: {}\n\n\
                     Respond as {{\"svg\": \"<svg ...>...</svg>\"}}.",
                    req.description
                ),
            )
            .await?;
        let svg = response
            .get("svg")
            .and_then(|v| v.as_str())
            .context("provider returned no svg field")?;
        if !svg.trim_start().starts_with("<svg") {
            anyhow::bail!("provider output is not an SVG document");
        }
        Ok(ImageArtifact {
            mime_type: "image/svg+xml".to_string(),
            bytes: svg.as_bytes().to_vec(),
        })
    }

    async fn summarize(&self, req: SummarizeRequest) -> Result<ThreadSummary> {
        let transcript = req
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.complete_json(
            None,
            "You summarize mail threads so a later model call can pick up the conversation.",
            &format!(
                "Summarize this thread in at most 350 words as {{\"summary\": \"...\"}}.\n\n{transcript}"
            ),
        )
        .await
    }

    async fn generate_reply(&self, req: ReplyRequest) -> Result<ReplyDraft> {
        let mut prompt = String::new();
        if let Some(summary) = &req.summary {
            prompt.push_str(&format!("Earlier context summary:\n{summary}\n\n"));
        }
        prompt.push_str("Recent messages:\n");
        for m in &req.history {
            prompt.push_str(&format!("{}: {}\n", m.role, m.content));
        }
        prompt.push_str(&format!(
            "\nLatest user message:\n{}\n\n\
             Write the assistant reply as \
             {{\"content\": \"...\", \"attachments\": [...]}}.\n\
             Attachments are optional; at most {} of them. Each is either \
             {{\"kind\": \"text\", \"fileName\": \"...\", \"content\": \"... (at most {} chars)\"}} or \
             {{\"kind\": \"image\", \"description\": \"...\", \"quality\": \"low|normal|high\"}}.",
            req.user_input, req.attachment_policy.max_count, req.attachment_policy.max_text_chars
        ));

        self.complete_json(
            req.model.as_deref(),
            "You are a helpful mail assistant. You reply to the user's latest message.",
            &prompt,
        )
        .await
    }
}

/// Strip a single ```...``` fence (with optional language tag) around a JSON body.
fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim().strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fences_handles_plain_json() {
        assert_eq!(strip_fences(r#"{"a": 1}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn strip_fences_removes_markdown_wrapper() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(strip_fences("```\n[1, 2]\n```"), "[1, 2]");
    }
}
