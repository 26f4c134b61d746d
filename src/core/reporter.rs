use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::core::orchestrator::types::Classification;

pub const GENERIC_FAILURE: &str =
    "Something went wrong while working on that. The details have been logged.";
pub const COULD_NOT_CLASSIFY: &str =
    "Sorry, I could not classify that request, so nothing was started. Could you rephrase it?";

/// Handle to a posted message so it can be edited later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub thread_id: String,
    pub message_id: String,
}

/// Outbound side of a chat surface.
#[async_trait]
pub trait MessagingSurface: Send + Sync {
    async fn send_message(&self, thread_id: &str, text: &str) -> Result<MessageRef>;
    async fn update_message(&self, message: &MessageRef, text: &str) -> Result<()>;
    async fn upload_file(&self, thread_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Surface that writes everything to the log. Used when no chat surface is configured.
#[derive(Default)]
pub struct LogSurface {
    next_id: AtomicU64,
}

#[async_trait]
impl MessagingSurface for LogSurface {
    async fn send_message(&self, thread_id: &str, text: &str) -> Result<MessageRef> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        info!("[thread:{}] {}", thread_id, text);
        Ok(MessageRef {
            thread_id: thread_id.to_string(),
            message_id: id.to_string(),
        })
    }

    async fn update_message(&self, message: &MessageRef, text: &str) -> Result<()> {
        info!(
            "[thread:{}] (edit {}) {}",
            message.thread_id, message.message_id, text
        );
        Ok(())
    }

    async fn upload_file(&self, thread_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()> {
        info!(
            "[thread:{}] file {} ({} bytes)",
            thread_id,
            filename,
            bytes.len()
        );
        Ok(())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on `.`, `!` or `?` followed by whitespace. Terminators stay with their sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?')
            && let Some(&(next_idx, next)) = chars.peek()
            && next.is_whitespace()
        {
            let sentence = text[start..next_idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx + ch.len_utf8();
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn hard_split(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

fn push_piece(
    chunks: &mut Vec<String>,
    current: &mut String,
    piece: &str,
    separator: &str,
    limit: usize,
) {
    if !current.is_empty()
        && char_len(current) + char_len(separator) + char_len(piece) > limit
    {
        flush(chunks, current);
    }
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

/// Split `text` into chunks of at most `limit` characters, preferring
/// paragraph boundaries, then sentence boundaries, then a hard cut.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) <= limit {
            push_piece(&mut chunks, &mut current, paragraph, "\n\n", limit);
            continue;
        }

        flush(&mut chunks, &mut current);
        for sentence in split_sentences(paragraph) {
            if char_len(sentence) <= limit {
                push_piece(&mut chunks, &mut current, sentence, " ", limit);
            } else {
                flush(&mut chunks, &mut current);
                for piece in hard_split(sentence, limit) {
                    push_piece(&mut chunks, &mut current, &piece, "", limit);
                }
            }
        }
        flush(&mut chunks, &mut current);
    }
    flush(&mut chunks, &mut current);
    chunks
}

/// Formats task progress for a [`MessagingSurface`].
#[derive(Clone)]
pub struct Reporter {
    surface: Arc<dyn MessagingSurface>,
    chunk_limit: usize,
}

impl Reporter {
    pub fn new(surface: Arc<dyn MessagingSurface>, chunk_limit: usize) -> Self {
        Self {
            surface,
            chunk_limit,
        }
    }

    pub async fn acknowledge(
        &self,
        thread_id: &str,
        classification: &Classification,
    ) -> Result<MessageRef> {
        let mut text = format!(
            "Got it: {} ({})",
            classification.summary,
            classification.intent.as_str()
        );
        if classification.needs_clarification()
            && let Some(question) = &classification.clarify_question
        {
            text.push_str(&format!(
                "\n\nBefore I start: {}\n(Reply here to answer, or say \"dismiss\" to drop it.)",
                question
            ));
        }
        self.surface.send_message(thread_id, &text).await
    }

    pub async fn could_not_classify(&self, thread_id: &str) -> Result<()> {
        self.surface
            .send_message(thread_id, COULD_NOT_CLASSIFY)
            .await?;
        Ok(())
    }

    pub async fn dismissed(&self, thread_id: &str, summary: &str) -> Result<()> {
        self.surface
            .send_message(thread_id, &format!("Okay, dropped: {}", summary))
            .await?;
        Ok(())
    }

    pub async fn progress_started(&self, thread_id: &str, summary: &str) -> Result<MessageRef> {
        self.surface
            .send_message(thread_id, &format!("Working on it: {}", summary))
            .await
    }

    pub async fn progress_phase(
        &self,
        message: &MessageRef,
        summary: &str,
        completed: usize,
        total: usize,
        phase: &str,
    ) -> Result<()> {
        self.surface
            .update_message(
                message,
                &format!(
                    "Working on it: {}\nPhase {}/{} done ({})",
                    summary, completed, total, phase
                ),
            )
            .await
    }

    /// Post the result body in order. Returns the number of messages sent.
    pub async fn result(&self, thread_id: &str, body: &str) -> Result<usize> {
        let chunks = chunk_message(body, self.chunk_limit);
        for chunk in &chunks {
            self.surface.send_message(thread_id, chunk).await?;
        }
        Ok(chunks.len())
    }

    pub async fn artifact_summary(&self, thread_id: &str, artifact_count: usize) -> Result<()> {
        let noun = if artifact_count == 1 {
            "artifact"
        } else {
            "artifacts"
        };
        self.surface
            .send_message(
                thread_id,
                &format!("Done. Produced {} {}.", artifact_count, noun),
            )
            .await?;
        Ok(())
    }

    pub async fn attach(&self, thread_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()> {
        self.surface.upload_file(thread_id, filename, bytes).await
    }

    pub async fn failure(&self, thread_id: &str) -> Result<()> {
        self.surface.send_message(thread_id, GENERIC_FAILURE).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SurfaceEvent {
        Sent { thread_id: String, text: String },
        Updated { message_id: String, text: String },
        Uploaded { thread_id: String, filename: String, len: usize },
    }

    /// Surface that remembers everything it was asked to do.
    #[derive(Default)]
    pub struct RecordingSurface {
        events: Mutex<Vec<SurfaceEvent>>,
        next_id: AtomicU64,
    }

    impl RecordingSurface {
        pub fn events(&self) -> Vec<SurfaceEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn sent_to(&self, thread_id: &str) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SurfaceEvent::Sent { thread_id: t, text } if t == thread_id => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl MessagingSurface for RecordingSurface {
        async fn send_message(&self, thread_id: &str, text: &str) -> Result<MessageRef> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            self.events.lock().unwrap().push(SurfaceEvent::Sent {
                thread_id: thread_id.to_string(),
                text: text.to_string(),
            });
            Ok(MessageRef {
                thread_id: thread_id.to_string(),
                message_id: id,
            })
        }

        async fn update_message(&self, message: &MessageRef, text: &str) -> Result<()> {
            self.events.lock().unwrap().push(SurfaceEvent::Updated {
                message_id: message.message_id.clone(),
                text: text.to_string(),
            });
            Ok(())
        }

        async fn upload_file(&self, thread_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()> {
            self.events.lock().unwrap().push(SurfaceEvent::Uploaded {
                thread_id: thread_id.to_string(),
                filename: filename.to_string(),
                len: bytes.len(),
            });
            Ok(())
        }
    }
}
