//! POST /api/query - submit a raw query.
//!
//! Runs spell correction through the retry executor, upserts the query row
//! (preserving the pre-correction input), and records a history entry.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::ApiError;
use crate::domains::search::Query;
use crate::kernel::llm::SpellRequest;
use crate::kernel::{CallContext, ServerKernel};

#[derive(Debug, Deserialize)]
pub struct SubmitQueryBody {
    query: Option<String>,
    language: Option<String>,
}

pub async fn submit_query_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Json(body): Json<SubmitQueryBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = body
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("query must not be empty".to_string()))?
        .to_string();

    let language = body
        .language
        .as_deref()
        .map(str::trim)
        .filter(|l| is_valid_language(l))
        .map(str::to_lowercase)
        .ok_or_else(|| ApiError::BadRequest("invalid language code".to_string()))?;

    let (value, mode) = if kernel.config.spell_correction {
        let request = SpellRequest {
            text: raw.clone(),
            language: language.clone(),
        };
        let executed = kernel
            .executor
            .execute(
                CallContext {
                    provider: kernel.provider.name().to_string(),
                    component: "query_api".to_string(),
                    trigger: "correct_spelling".to_string(),
                    request_snapshot: serde_json::to_value(&request).ok(),
                },
                || kernel.provider.correct_spelling(request.clone()),
            )
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!(e).context("spell correction failed")))?;
        (executed.value.text.trim().to_string(), "llm")
    } else {
        (raw.clone(), "off")
    };

    let correction_applied = value != raw;
    let query = Query::upsert(&kernel.db, &value, &raw, &language).await?;
    Query::record_history(&kernel.db, query.id, &raw, correction_applied).await?;

    let mut response = json!({
        "queryId": query.id,
        "query": query.value,
        "originalQuery": raw,
        "correctionApplied": correction_applied,
        "language": language,
        "spellCorrectionMode": mode,
    });
    if correction_applied {
        response["correctedQuery"] = json!(query.value);
    }
    Ok(Json(response))
}

/// Language codes like `en`, `de`, `pt-br`.
fn is_valid_language(code: &str) -> bool {
    (2..=8).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '-')
}
