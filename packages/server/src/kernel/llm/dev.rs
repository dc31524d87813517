// Deterministic Provider Gateway for local development.
//
// No network, no latency. Artifacts are derived from the request so the full
// pipeline (intents, articles, mail replies) can be exercised offline.

use anyhow::Result;
use async_trait::async_trait;

use super::{
    normalize_intents, ArticleDraft, ArticleRequest, ArticleResult, ImageArtifact, ImageRequest,
    IntentRequest, IntentResolution, LlmProvider, Recommendation, ReplyDraft, ReplyRequest,
    ResolvedIntent, SpellRequest, SpellResult, SummarizeRequest, ThreadSummary,
};

/// 1x1 transparent PNG.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x64,
    0x60, 0xf8, 0x5f, 0x0f, 0x00, 0x02, 0x87, 0x01, 0x80, 0xeb, 0x47, 0xba, 0x92, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

#[derive(Default)]
pub struct DevProvider;

impl DevProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmProvider for DevProvider {
    fn name(&self) -> &'static str {
        "dev"
    }

    async fn correct_spelling(&self, req: SpellRequest) -> Result<SpellResult> {
        // Whitespace normalization stands in for correction.
        Ok(SpellResult {
            text: req.text.split_whitespace().collect::<Vec<_>>().join(" "),
        })
    }

    async fn resolve_intent(&self, req: IntentRequest) -> Result<IntentResolution> {
        let base = req.query.trim();
        let items = vec![
            ResolvedIntent {
                intent: format!("{base} overview"),
                title: format!("Overview: {base}"),
                summary: format!("A general introduction to {base}."),
            },
            ResolvedIntent {
                intent: format!("{base} how-to"),
                title: format!("How to use {base}"),
                summary: format!("Step-by-step usage of {base}."),
            },
            ResolvedIntent {
                intent: format!("{base} reference"),
                title: format!("Reference: {base}"),
                summary: format!("Reference material for {base}."),
            },
        ];
        Ok(IntentResolution {
            items: normalize_intents(items),
        })
    }

    async fn create_article(&self, req: ArticleRequest) -> Result<ArticleResult> {
        let slug = format!("{}.{}", slugify(&req.intent), req.filetype);
        Ok(ArticleResult {
            article: ArticleDraft {
                title: req.intent.clone(),
                slug,
                content: format!(
                    "# {}\n\nGenerated for query `{}` ({}).\n\n\
                     This is deterministic development content.\n",
                    req.intent, req.query, req.language
                ),
                generated_by: "dev".to_string(),
            },
            recommendations: vec![Recommendation {
                title: format!("More on {}", req.query),
                summary: "Related development material.".to_string(),
            }],
        })
    }

    async fn create_image(&self, _req: ImageRequest) -> Result<ImageArtifact> {
        Ok(ImageArtifact {
            mime_type: "image/png".to_string(),
            bytes: PLACEHOLDER_PNG.to_vec(),
        })
    }

    async fn summarize(&self, req: SummarizeRequest) -> Result<ThreadSummary> {
        let mut summary = String::from("Thread so far: ");
        for m in req.messages.iter().rev().take(3).rev() {
            summary.push_str(&format!("[{}] {} ", m.role, m.content));
        }
        Ok(ThreadSummary {
            summary: summary.split_whitespace().take(350).collect::<Vec<_>>().join(" "),
        })
    }

    async fn generate_reply(&self, req: ReplyRequest) -> Result<ReplyDraft> {
        Ok(ReplyDraft {
            content: format!("Noted: {}", req.user_input),
            attachments: Vec::new(),
        })
    }
}

fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_dash = true;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn intents_are_deterministic_and_bounded() {
        let provider = DevProvider::new();
        let req = IntentRequest {
            query: "sqlite fts5".to_string(),
            language: "en".to_string(),
            filetype: "md".to_string(),
        };
        let a = provider.resolve_intent(req.clone()).await.unwrap();
        let b = provider.resolve_intent(req).await.unwrap();
        assert_eq!(a.items.len(), b.items.len());
        assert!(!a.items.is_empty() && a.items.len() <= 5);
    }

    #[tokio::test]
    async fn article_slug_carries_the_filetype_extension() {
        let provider = DevProvider::new();
        let result = provider
            .create_article(ArticleRequest {
                query: "q".to_string(),
                intent: "SQLite FTS5 Overview!".to_string(),
                language: "en".to_string(),
                filetype: "md".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result.article.slug, "sqlite-fts5-overview.md");
        assert!(!result.article.content.is_empty());
    }

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("Hello,  World!"), "hello-world");
        assert_eq!(slugify("--x--"), "x");
    }
}
