//! Mail reply pipeline.
//!
//! Turns a `mail_reply` order into an assistant reply: sliding-window
//! context, an optional rolling thread summary once the history grows past
//! the token threshold, provider-requested attachments, and the derived
//! thread title for untitled threads.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domains::orders::Order;
use crate::kernel::events::MailEvent;
use crate::kernel::llm::{
    AttachmentPolicy, DraftAttachment, ImageRequest, MailMessage, ReplyRequest, SummarizeRequest,
};
use crate::kernel::{CallContext, ServerKernel, StreamKey};

use super::attachment::MailAttachment;
use super::reply::{MailReply, ReplyRole, ReplyStatus};
use super::thread::{derive_thread_title, MailThread};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailOrderPayload {
    pub thread_id: i64,
    pub user_reply_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_model: Option<String>,
}

/// Tokens are estimated as ceil(chars / 4); close enough to budget context.
fn estimate_tokens(replies: &[MailReply]) -> i64 {
    let chars: i64 = replies.iter().map(|r| r.content.chars().count() as i64).sum();
    (chars + 3) / 4
}

fn to_messages(replies: &[MailReply]) -> Vec<MailMessage> {
    replies
        .iter()
        .map(|r| MailMessage {
            role: r.role.as_str().to_string(),
            content: r.content.clone(),
        })
        .collect()
}

pub async fn run_mail_order(kernel: &Arc<ServerKernel>, order: &Order) -> Result<Option<String>> {
    let payload: MailOrderPayload = order
        .payload()?
        .context("mail order has no request payload")?;

    let thread = MailThread::find_by_id(&kernel.db, payload.thread_id)
        .await
        .context("mail thread not found")?;
    let history = MailReply::history(&kernel.db, thread.id).await?;
    let latest = history.last().context("mail thread has no replies")?;
    let latest_id = latest.id;

    let user_reply = MailReply::find_by_id(&kernel.db, payload.user_reply_id)
        .await
        .context("user reply not found")?;

    let stream = StreamKey::mail(&thread.uid);
    kernel
        .dispatcher
        .emit(
            &stream,
            Some(order.id),
            &MailEvent::JobStarted {
                thread_uid: thread.uid.clone(),
                order_id: order.id,
            },
        )
        .await?;

    let model = payload
        .requested_model
        .clone()
        .unwrap_or_else(|| kernel.config.default_mail_model.clone());

    // Sliding window for generation; summary covers what fell off.
    let window_size = kernel.settings.mail_max_messages().await;
    let window_start = history.len().saturating_sub(window_size);
    let window = &history[window_start..];

    let trigger = kernel.settings.mail_summary_trigger_tokens().await as i64;
    let estimate = estimate_tokens(&history);
    let mut summary = thread.context_summary.clone();
    if estimate >= trigger && thread.last_summarized_reply_id != Some(latest_id) {
        let request = SummarizeRequest {
            messages: to_messages(&history),
        };
        let executed = kernel
            .executor
            .execute(
                CallContext {
                    provider: kernel.provider.name().to_string(),
                    component: "mail_pipeline".to_string(),
                    trigger: "summarize".to_string(),
                    request_snapshot: serde_json::to_value(&request).ok(),
                },
                || kernel.provider.summarize(request.clone()),
            )
            .await?;
        let text = executed.value.summary;
        let token_count = (text.chars().count() as i64 + 3) / 4;
        MailThread::set_context_summary(&kernel.db, thread.id, &text, token_count, latest_id)
            .await?;
        summary = Some(text);
    }

    let policy = AttachmentPolicy {
        max_count: kernel.settings.mail_attachments_max_count().await,
        max_text_chars: kernel.settings.mail_attachment_max_text_chars().await,
    };
    let request = ReplyRequest {
        history: to_messages(window),
        summary: summary.clone(),
        user_input: user_reply.content.clone(),
        attachment_policy: policy,
        model: Some(model.clone()),
    };
    let executed = kernel
        .executor
        .execute(
            CallContext {
                provider: kernel.provider.name().to_string(),
                component: "mail_pipeline".to_string(),
                trigger: "generate_reply".to_string(),
                request_snapshot: serde_json::to_value(&request).ok(),
            },
            || kernel.provider.generate_reply(request.clone()),
        )
        .await?;
    let draft = executed.value;

    let reply = MailReply::append(
        &kernel.db,
        thread.id,
        ReplyRole::Assistant,
        &draft.content,
        ReplyStatus::Completed,
        true,
        Some(&model),
    )
    .await?;

    let mut attachment_count: i64 = 0;
    for requested in draft.attachments.into_iter().take(policy.max_count as usize) {
        match requested {
            DraftAttachment::Text { file_name, content } => {
                let bounded: String = content
                    .chars()
                    .take(policy.max_text_chars as usize)
                    .collect();
                MailAttachment::insert_text(&kernel.db, reply.id, &file_name, &bounded).await?;
            }
            DraftAttachment::Image {
                description,
                quality,
            } => {
                let request = ImageRequest {
                    description: description.clone(),
                    quality,
                };
                let image = kernel
                    .executor
                    .execute(
                        CallContext {
                            provider: kernel.provider.name().to_string(),
                            component: "mail_pipeline".to_string(),
                            trigger: "create_image".to_string(),
                            request_snapshot: serde_json::to_value(&request).ok(),
                        },
                        || kernel.provider.create_image(request.clone()),
                    )
                    .await?
                    .value;
                MailAttachment::insert_image(
                    &kernel.db,
                    reply.id,
                    &image.mime_type,
                    &image.bytes,
                    &description,
                )
                .await?;
            }
        }
        attachment_count += 1;
    }

    if !thread.user_set_title && thread.title.is_empty() {
        let title = derive_thread_title(&user_reply.content);
        if !title.is_empty() {
            MailThread::set_derived_title(&kernel.db, thread.id, &title).await?;
        }
    }
    MailThread::touch(&kernel.db, thread.id).await?;

    let refreshed = MailThread::find_by_id(&kernel.db, thread.id).await?;
    kernel
        .dispatcher
        .emit(
            &stream,
            Some(order.id),
            &MailEvent::ReplyCreated {
                thread_uid: thread.uid.clone(),
                reply_id: reply.id,
                role: reply.role.as_str().to_string(),
                content: reply.content.clone(),
                attachment_count,
            },
        )
        .await?;
    kernel
        .dispatcher
        .emit(
            &stream,
            Some(order.id),
            &MailEvent::ThreadUpdated {
                thread_uid: thread.uid.clone(),
                title: refreshed.title.clone(),
                updated_at: crate::common::time::to_iso(refreshed.updated_at),
            },
        )
        .await?;
    let unread = MailThread::unread_count(&kernel.db, thread.id).await?;
    kernel
        .dispatcher
        .emit(
            &stream,
            Some(order.id),
            &MailEvent::UnreadChanged {
                thread_uid: thread.uid.clone(),
                unread_count: unread,
            },
        )
        .await?;

    Ok(Some(format!("reply {} generated", reply.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::domains::orders::{NewOrder, OrderKind, RequestedBy};
    use crate::kernel::events::StreamEvent;
    use crate::kernel::llm::{
        ArticleRequest, ArticleResult, ImageArtifact, ImageQuality, IntentRequest,
        IntentResolution, LlmProvider, ReplyDraft, SpellRequest, SpellResult, ThreadSummary,
    };
    use crate::kernel::test_support::{test_kernel, test_kernel_with};

    /// Scripted provider capturing reply requests and emitting canned
    /// drafts/attachments.
    struct ScriptedProvider {
        draft: ReplyDraft,
        reply_requests: Mutex<Vec<ReplyRequest>>,
        summaries: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(draft: ReplyDraft) -> Self {
            Self {
                draft,
                reply_requests: Mutex::new(Vec::new()),
                summaries: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn correct_spelling(&self, req: SpellRequest) -> AnyResult<SpellResult> {
            Ok(SpellResult { text: req.text })
        }

        async fn resolve_intent(&self, _req: IntentRequest) -> AnyResult<IntentResolution> {
            anyhow::bail!("not scripted")
        }

        async fn create_article(&self, _req: ArticleRequest) -> AnyResult<ArticleResult> {
            anyhow::bail!("not scripted")
        }

        async fn create_image(&self, req: ImageRequest) -> AnyResult<ImageArtifact> {
            Ok(ImageArtifact {
                mime_type: "image/png".to_string(),
                bytes: req.description.as_bytes().to_vec(),
            })
        }

        async fn summarize(&self, _req: SummarizeRequest) -> AnyResult<ThreadSummary> {
            *self.summaries.lock().unwrap() += 1;
            Ok(ThreadSummary {
                summary: "rolling summary".to_string(),
            })
        }

        async fn generate_reply(&self, req: ReplyRequest) -> AnyResult<ReplyDraft> {
            self.reply_requests.lock().unwrap().push(req);
            Ok(self.draft.clone())
        }
    }

    async fn seeded_thread(
        kernel: &Arc<ServerKernel>,
        user_content: &str,
    ) -> (MailThread, MailReply, Order) {
        let thread = MailThread::create(&kernel.db, None).await.unwrap();
        let user_reply = MailReply::append(
            &kernel.db,
            thread.id,
            ReplyRole::User,
            user_content,
            ReplyStatus::Completed,
            false,
            None,
        )
        .await
        .unwrap();
        let order = Order::create(
            &kernel.db,
            NewOrder {
                query_id: None,
                kind: OrderKind::MailReply,
                intent_id: None,
                article_id: None,
                requested_by: RequestedBy::User,
                request_payload: Some(
                    serde_json::to_value(MailOrderPayload {
                        thread_id: thread.id,
                        user_reply_id: user_reply.id,
                        requested_model: None,
                    })
                    .unwrap(),
                ),
            },
        )
        .await
        .unwrap();
        Order::claim_next(&kernel.db).await.unwrap().unwrap();
        let order = Order::find_by_id(&kernel.db, order.id).await.unwrap();
        (thread, user_reply, order)
    }

    #[tokio::test]
    async fn reply_is_appended_unread_with_the_resolved_model() {
        let kernel = test_kernel().await;
        let (thread, _, order) = seeded_thread(&kernel, "Remind me to file taxes").await;

        run_mail_order(&kernel, &order).await.unwrap();

        let history = MailReply::history(&kernel.db, thread.id).await.unwrap();
        assert_eq!(history.len(), 2);
        let assistant = &history[1];
        assert_eq!(assistant.role, ReplyRole::Assistant);
        assert_eq!(assistant.status, ReplyStatus::Completed);
        assert!(assistant.unread);
        assert_eq!(assistant.model.as_deref(), Some("dev-model"));
    }

    #[tokio::test]
    async fn untitled_thread_gets_a_derived_title_and_events_fire() {
        let kernel = test_kernel().await;
        let (thread, _, order) = seeded_thread(&kernel, "Remind me to …\n\nThanks").await;

        run_mail_order(&kernel, &order).await.unwrap();

        let refreshed = MailThread::find_by_id(&kernel.db, thread.id).await.unwrap();
        assert_eq!(refreshed.title, "Remind me to …");

        let events: Vec<(i64, MailEvent)> = kernel
            .dispatcher
            .replay_after(&StreamKey::mail(&thread.uid), 0)
            .await
            .unwrap();
        let types: Vec<&str> = events.iter().map(|(_, e)| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "mail.job.started",
                "mail.reply.created",
                "mail.thread.updated",
                "mail.unread.changed",
            ]
        );
    }

    #[tokio::test]
    async fn attachments_are_persisted_with_caps_applied() {
        let draft = ReplyDraft {
            content: "see attachments".to_string(),
            attachments: vec![
                DraftAttachment::Text {
                    file_name: "notes.txt".to_string(),
                    content: "x".repeat(100_000),
                },
                DraftAttachment::Image {
                    description: "a diagram".to_string(),
                    quality: ImageQuality::Normal,
                },
                DraftAttachment::Text {
                    file_name: "extra1.txt".to_string(),
                    content: "1".to_string(),
                },
                DraftAttachment::Text {
                    file_name: "extra2.txt".to_string(),
                    content: "2".to_string(),
                },
            ],
        };
        let kernel = test_kernel_with(Arc::new(ScriptedProvider::new(draft))).await;
        let (thread, _, order) = seeded_thread(&kernel, "draw it").await;

        run_mail_order(&kernel, &order).await.unwrap();

        let history = MailReply::history(&kernel.db, thread.id).await.unwrap();
        let attachments = MailAttachment::for_reply(&kernel.db, history[1].id)
            .await
            .unwrap();
        // Count capped at the default of 3.
        assert_eq!(attachments.len(), 3);
        // Text bounded to max_text_chars.
        assert_eq!(
            attachments[0].text_content.as_ref().unwrap().chars().count(),
            8_000
        );
        assert_eq!(attachments[1].kind, "image");
        assert_eq!(attachments[1].bytes(), b"a diagram".to_vec());
    }

    #[tokio::test]
    async fn long_history_triggers_a_summary_once_per_tip() {
        let provider = Arc::new(ScriptedProvider::new(ReplyDraft {
            content: "ok".to_string(),
            attachments: vec![],
        }));
        let kernel = test_kernel_with(provider.clone()).await;

        let thread = MailThread::create(&kernel.db, Some("Long")).await.unwrap();
        // ~24k chars -> ~6k estimated tokens, past the 5k default trigger.
        for _ in 0..6 {
            MailReply::append(
                &kernel.db,
                thread.id,
                ReplyRole::User,
                &"y".repeat(4_000),
                ReplyStatus::Completed,
                false,
                None,
            )
            .await
            .unwrap();
        }
        let last = MailReply::history(&kernel.db, thread.id)
            .await
            .unwrap()
            .pop()
            .unwrap();

        let order = Order::create(
            &kernel.db,
            NewOrder {
                query_id: None,
                kind: OrderKind::MailReply,
                intent_id: None,
                article_id: None,
                requested_by: RequestedBy::User,
                request_payload: Some(
                    serde_json::to_value(MailOrderPayload {
                        thread_id: thread.id,
                        user_reply_id: last.id,
                        requested_model: Some("requested-model".to_string()),
                    })
                    .unwrap(),
                ),
            },
        )
        .await
        .unwrap();
        Order::claim_next(&kernel.db).await.unwrap().unwrap();
        let order = Order::find_by_id(&kernel.db, order.id).await.unwrap();

        run_mail_order(&kernel, &order).await.unwrap();

        assert_eq!(*provider.summaries.lock().unwrap(), 1);
        let refreshed = MailThread::find_by_id(&kernel.db, thread.id).await.unwrap();
        assert_eq!(refreshed.context_summary.as_deref(), Some("rolling summary"));
        assert_eq!(refreshed.last_summarized_reply_id, Some(last.id));

        // The generated reply saw the summary and the requested model.
        let requests = provider.reply_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].summary.as_deref(), Some("rolling summary"));
        assert_eq!(requests[0].model.as_deref(), Some("requested-model"));
    }

    #[tokio::test]
    async fn window_slices_the_last_n_messages() {
        let provider = Arc::new(ScriptedProvider::new(ReplyDraft {
            content: "ok".to_string(),
            attachments: vec![],
        }));
        let kernel = test_kernel_with(provider.clone()).await;
        sqlx::query(
            "INSERT INTO runtime_settings (key, value, updated_at) VALUES ('mail.context.max_messages', '2', datetime('now'))",
        )
        .execute(&kernel.db)
        .await
        .unwrap();

        let thread = MailThread::create(&kernel.db, Some("W")).await.unwrap();
        for i in 0..5 {
            MailReply::append(
                &kernel.db,
                thread.id,
                ReplyRole::User,
                &format!("message {i}"),
                ReplyStatus::Completed,
                false,
                None,
            )
            .await
            .unwrap();
        }
        let last = MailReply::history(&kernel.db, thread.id)
            .await
            .unwrap()
            .pop()
            .unwrap();
        let order = Order::create(
            &kernel.db,
            NewOrder {
                query_id: None,
                kind: OrderKind::MailReply,
                intent_id: None,
                article_id: None,
                requested_by: RequestedBy::User,
                request_payload: Some(
                    serde_json::to_value(MailOrderPayload {
                        thread_id: thread.id,
                        user_reply_id: last.id,
                        requested_model: None,
                    })
                    .unwrap(),
                ),
            },
        )
        .await
        .unwrap();
        Order::claim_next(&kernel.db).await.unwrap().unwrap();
        let order = Order::find_by_id(&kernel.db, order.id).await.unwrap();

        run_mail_order(&kernel, &order).await.unwrap();

        let requests = provider.reply_requests.lock().unwrap();
        assert_eq!(requests[0].history.len(), 2);
        assert_eq!(requests[0].history[0].content, "message 3");
        assert_eq!(requests[0].history[1].content, "message 4");
    }

    #[test]
    fn token_estimate_is_ceil_chars_over_four() {
        let reply = |content: &str| MailReply {
            id: 1,
            thread_id: 1,
            role: ReplyRole::User,
            content: content.to_string(),
            status: ReplyStatus::Completed,
            unread: false,
            model: None,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(estimate_tokens(&[reply("abcd")]), 1);
        assert_eq!(estimate_tokens(&[reply("abcde")]), 2);
        assert_eq!(estimate_tokens(&[]), 0);
    }
}
