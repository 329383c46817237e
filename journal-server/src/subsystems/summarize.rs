//! Summarizer - condense a user's entries into a polished journal summary
//!
//! Only `user` entries feed the model, joined by newlines, with a fixed
//! editing instruction. The reply is split into narrative and key points on
//! the first blank line. The result is persisted only when the caller's
//! verified identity owns the requested user id; anonymous callers still get
//! the text back.

use chrono::NaiveDate;
use journal_core::{
    ChatTurn, CompletionBackend, CompletionError, Message, NewSummary, Summary, SummarySections,
};
use thiserror::Error;

use crate::subsystems::summary_store::{StoreError, SummaryStore};

pub const SUMMARY_INSTRUCTION: &str = "You are a journal entry editor. Take the provided \
journal entries and create a brief summary of the key points";

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("No journal entries to summarize")]
    NoEntries,

    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Summary store failed: {0}")]
    Store(#[from] StoreError),
}

/// Who is asking, for whom, and for which day.
#[derive(Debug, Clone)]
pub struct SummaryRequest<'a> {
    pub user_id: &'a str,
    pub date: NaiveDate,
    /// Verified identity of the caller, if any.
    pub identity: Option<&'a str>,
}

impl SummaryRequest<'_> {
    /// Persist only for an authenticated caller summarizing their own entries.
    pub fn may_persist(&self) -> bool {
        self.identity == Some(self.user_id)
    }
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    /// Raw model reply, narrative and key points separated by a blank line.
    pub text: String,
    pub summary: Summary,
    pub persisted: bool,
}

/// Contents of the user-authored entries, in history order.
pub fn user_entries(history: &[Message]) -> Vec<String> {
    history
        .iter()
        .filter(|m| m.is_user())
        .map(|m| m.content.clone())
        .collect()
}

pub async fn summarize(
    history: &[Message],
    request: &SummaryRequest<'_>,
    backend: &dyn CompletionBackend,
    store: &dyn SummaryStore,
) -> Result<SummaryOutcome, SummarizeError> {
    let entries = user_entries(history);
    if entries.is_empty() {
        return Err(SummarizeError::NoEntries);
    }

    let text = backend
        .complete(vec![
            ChatTurn::system(SUMMARY_INSTRUCTION),
            ChatTurn::user(entries.join("\n")),
        ])
        .await?;

    let sections = SummarySections::parse(&text);
    let draft = NewSummary {
        user_id: request.user_id.to_string(),
        date: request.date,
        polished_entry: sections.polished_entry,
        key_points: sections.key_points,
        original_entries: entries,
    };

    let (summary, persisted) = if request.may_persist() {
        let stored = store.store(draft).await?;
        tracing::info!(user_id = %request.user_id, date = %request.date, "Summary stored");
        (stored, true)
    } else {
        tracing::info!(
            user_id = %request.user_id,
            authenticated = request.identity.is_some(),
            "Summary not persisted: caller does not own this history"
        );
        (
            Summary::stamped(draft, journal_core::models::now_millis()),
            false,
        )
    };

    Ok(SummaryOutcome {
        text,
        summary,
        persisted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::summary_store::MemorySummaryStore;
    use async_trait::async_trait;
    use journal_core::{ChunkStream, MessageKind};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct CannedBackend {
        reply: Result<String, u16>,
        seen: Mutex<Vec<ChatTurn>>,
    }

    impl CannedBackend {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for CannedBackend {
        async fn stream_chat(&self, _messages: Vec<ChatTurn>) -> Result<ChunkStream, CompletionError> {
            Err(CompletionError::MissingContent)
        }

        async fn complete(&self, messages: Vec<ChatTurn>) -> Result<String, CompletionError> {
            *self.seen.lock().unwrap() = messages;
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(code) => Err(CompletionError::Api {
                    code: *code,
                    message: "upstream down".to_string(),
                }),
            }
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn day() -> NaiveDate {
        journal_core::models::parse_date("2024-01-15").unwrap()
    }

    fn history() -> Vec<Message> {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        vec![
            Message::assistant(Uuid::new_v4(), "Describe your day."),
            Message::user(first, "I walked the dog"),
            Message::assistant(first, "Talk about the walk."),
            Message::user(second, "It rained"),
            Message::error(second, "Error processing message"),
        ]
    }

    #[test]
    fn test_user_entries_keep_only_user_kind() {
        let entries = user_entries(&history());
        assert_eq!(entries, vec!["I walked the dog", "It rained"]);
    }

    #[test]
    fn test_may_persist_requires_matching_identity() {
        let own = SummaryRequest {
            user_id: "u1",
            date: day(),
            identity: Some("u1"),
        };
        let other = SummaryRequest {
            identity: Some("u2"),
            ..own.clone()
        };
        let anon = SummaryRequest {
            identity: None,
            ..own.clone()
        };
        assert!(own.may_persist());
        assert!(!other.may_persist());
        assert!(!anon.may_persist());
    }

    #[tokio::test]
    async fn test_owner_summary_is_split_and_persisted() {
        let backend = CannedBackend::replying("A calm day outside.\n\n- walk\n- rain");
        let store = MemorySummaryStore::new();
        let request = SummaryRequest {
            user_id: "u1",
            date: day(),
            identity: Some("u1"),
        };

        let outcome = summarize(&history(), &request, &backend, &store).await.unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.text, "A calm day outside.\n\n- walk\n- rain");
        assert_eq!(outcome.summary.polished_entry, "A calm day outside.");
        assert_eq!(outcome.summary.key_points, "- walk\n- rain");
        assert_eq!(outcome.summary.original_entries.len(), 2);
        assert_eq!(store.len().await, 1);

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0], ChatTurn::system(SUMMARY_INSTRUCTION));
        assert_eq!(seen[1], ChatTurn::user("I walked the dog\nIt rained"));
    }

    #[tokio::test]
    async fn test_anonymous_summary_is_returned_but_not_stored() {
        let backend = CannedBackend::replying("No separator here");
        let store = MemorySummaryStore::new();
        let request = SummaryRequest {
            user_id: "u1",
            date: day(),
            identity: None,
        };

        let outcome = summarize(&history(), &request, &backend, &store).await.unwrap();
        assert!(!outcome.persisted);
        assert_eq!(outcome.summary.polished_entry, "No separator here");
        assert!(outcome.summary.key_points.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_no_user_entries_skips_the_model() {
        let backend = CannedBackend::replying("unused");
        let store = MemorySummaryStore::new();
        let only_prompt = vec![Message::assistant(Uuid::new_v4(), "Describe your day.")];
        let request = SummaryRequest {
            user_id: "u1",
            date: day(),
            identity: Some("u1"),
        };

        let result = summarize(&only_prompt, &request, &backend, &store).await;
        assert!(matches!(result, Err(SummarizeError::NoEntries)));
        assert!(backend.seen.lock().unwrap().is_empty());
        assert!(only_prompt.iter().all(|m| m.kind != MessageKind::User));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_propagated() {
        let backend = CannedBackend {
            reply: Err(503),
            seen: Mutex::new(Vec::new()),
        };
        let store = MemorySummaryStore::new();
        let request = SummaryRequest {
            user_id: "u1",
            date: day(),
            identity: Some("u1"),
        };

        let result = summarize(&history(), &request, &backend, &store).await;
        assert!(matches!(result, Err(SummarizeError::Completion(_))));
        assert!(store.is_empty().await);
    }
}
