//! # Conversation memory
//!
//! Each answered query is written back into the index as two chat documents
//! (the user's question and the assistant's answer), so later queries can
//! both retrieve them semantically and read them back as "recent memory".
//!
//! Timestamps are UTC with microsecond precision in a lexicographically
//! sortable format, which is what lets [`VectorIndex::scan`] order memory by
//! comparing strings. The assistant turn is always stamped strictly after the
//! user turn.

use chrono::{DateTime, Duration, Utc};
use tracing::*;

use crate::error::RecallError;
use crate::models::{ChatRole, Document, DocumentSource};
use crate::vector_store::{MetadataFilter, VectorIndex};

/// `chrono` format for chat timestamps, e.g. `2025-03-14T12:00:00.000000`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The user and assistant documents for one exchange, in that order.
pub fn exchange_documents(
    question: &str,
    answer: &str,
    now: DateTime<Utc>,
) -> Result<[Document; 2], RecallError> {
    let user_at = now;
    let assistant_at = now + Duration::microseconds(1);
    Ok([
        Document::chat(ChatRole::User, question, format_timestamp(user_at))?,
        Document::chat(ChatRole::Assistant, answer, format_timestamp(assistant_at))?,
    ])
}

/// Store both turns of an exchange.
pub async fn remember_exchange(
    index: &VectorIndex,
    question: &str,
    answer: &str,
    now: DateTime<Utc>,
) -> Result<(), RecallError> {
    for document in exchange_documents(question, answer, now)? {
        index.insert_with_fallback(document).await?;
    }
    debug!("Stored exchange in conversation memory");
    Ok(())
}

/// The `limit` most recent chat documents as `"[timestamp] text"` lines,
/// newest first. Failures are logged and yield no memory.
pub async fn recent_memory(index: &VectorIndex, limit: usize) -> Vec<String> {
    let filter = MetadataFilter::source(DocumentSource::Chat.as_str());
    let documents = match index.scan(&filter, limit).await {
        Ok(documents) => documents,
        Err(e) => {
            warn!("Failed to fetch chat memory: {}", e);
            return Vec::new();
        }
    };

    documents
        .iter()
        .filter_map(|doc| {
            let text = if doc.text.trim().is_empty() {
                doc.content()?
            } else {
                doc.text.as_str()
            };
            Some(format!("[{}] {}", doc.timestamp().unwrap_or_default(), text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-14T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn exchange_is_ordered_and_tagged() {
        let [user, assistant] = exchange_documents("Where?", "Da Lat", fixed_now()).unwrap();

        assert_eq!(user.text, "[User | 2025-03-14T12:00:00.000000] Where?");
        assert_eq!(assistant.text, "[Assistant | 2025-03-14T12:00:00.000001] Da Lat");
        assert_eq!(user.source(), Some(DocumentSource::Chat));
        assert_eq!(user.metadata["role"], "user");
        assert_eq!(assistant.metadata["role"], "assistant");
        assert!(assistant.timestamp().unwrap() > user.timestamp().unwrap());
    }

    #[tokio::test]
    async fn recent_memory_is_newest_first() {
        let index = VectorIndex::open(Arc::new(InMemoryStore::new()), None)
            .await
            .unwrap();
        let first = fixed_now();
        let second = first + Duration::seconds(30);
        remember_exchange(&index, "first question", "first answer", first)
            .await
            .unwrap();
        remember_exchange(&index, "second question", "second answer", second)
            .await
            .unwrap();
        index
            .insert(Document::journal(1, "not memory", vec![]).unwrap())
            .await
            .unwrap();

        let memory = recent_memory(&index, 3).await;
        assert_eq!(memory.len(), 3);
        assert!(memory[0].contains("second answer"));
        assert!(memory[1].contains("second question"));
        assert!(memory[2].contains("first answer"));
        assert!(memory[0].starts_with("[2025-03-14T12:00:30.000001] [Assistant |"));
        assert!(memory.iter().all(|m| !m.contains("not memory")));
    }
}
