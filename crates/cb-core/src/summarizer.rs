//! Fixed-size block summarization of long conversations.
//!
//! Every `block_size` user messages (each paired with one reply) the matching
//! `2 * block_size` turns are compressed into one [`SummaryBlock`]. Only
//! premium conversations are summarized; the caller decides that.

use std::sync::Arc;

use crate::{
    config::ConversationConfig,
    domain::{BlockRange, Role, SummaryBlock, Turn, UserId},
    errors::Error,
    model::{
        client::CompletionClient,
        types::{ChatMessage, CompletionRequest},
    },
    store::port::{MessageStore, SummaryStore, TurnQuery},
    Result,
};

/// Summaries are extraction, not conversation.
pub const MAX_SUMMARY_TEMPERATURE: f32 = 0.3;

const SUMMARY_INSTRUCTION: &str = "You are a coaching assistant. Write a short summary \
of this dialogue (3-5 sentences).

Make sure to keep:
- The user's main goals
- Key problems and triggers
- Progress and setbacks
- Behavioral patterns

Dialogue:";

/// Block that closes when the user's lifetime message count reaches `user_turns`.
///
/// Assumes every user turn is followed by exactly one assistant turn.
pub fn block_for_count(user_turns: u64, block_size: u64) -> Option<BlockRange> {
    if block_size == 0 || user_turns == 0 || user_turns % block_size != 0 {
        return None;
    }
    let end = user_turns * 2;
    Some(BlockRange {
        start: end - block_size * 2 + 1,
        end,
    })
}

/// `"<label>: <content>"` per turn, oldest first, newline separated.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.transcript_label(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summary_prompt(transcript: &str) -> String {
    format!("{SUMMARY_INSTRUCTION}\n{transcript}\n\nSummary (facts only, no filler):")
}

pub struct Summarizer {
    messages: Arc<dyn MessageStore>,
    summaries: Arc<dyn SummaryStore>,
    model: Arc<dyn CompletionClient>,
    block_size: u64,
    max_tokens: u32,
    temperature: f32,
}

impl Summarizer {
    pub fn new(
        cfg: &ConversationConfig,
        messages: Arc<dyn MessageStore>,
        summaries: Arc<dyn SummaryStore>,
        model: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            messages,
            summaries,
            model,
            block_size: cfg.block_size,
            max_tokens: cfg.summary_max_tokens,
            temperature: cfg.summary_temperature.min(MAX_SUMMARY_TEMPERATURE),
        }
    }

    /// Create the summary block that closes at the user's current message count.
    ///
    /// Returns `Ok(None)` when no block is due, when it already exists, or when
    /// the range is empty. Safe to call repeatedly and concurrently for the
    /// same boundary.
    pub async fn maybe_create_summary(&self, user: UserId) -> Result<Option<String>> {
        let user_turns = self.messages.count_turns(user, Some(Role::User)).await?;
        let Some(range) = block_for_count(user_turns, self.block_size) else {
            return Ok(None);
        };

        if self
            .summaries
            .find_summary_by_start(user, range.start)
            .await?
            .is_some()
        {
            tracing::debug!(
                user = %user,
                block_start = range.start,
                "summary block already exists"
            );
            return Ok(None);
        }

        self.create_summary(user, range).await
    }

    /// Summarize `range` and persist it, unless a block with the same start
    /// appears while the model call is in flight.
    pub async fn create_summary(&self, user: UserId, range: BlockRange) -> Result<Option<String>> {
        let turns = self
            .messages
            .query_turns(user, TurnQuery::ordinal_range(range))
            .await?;
        if turns.is_empty() {
            tracing::warn!(
                user = %user,
                block_start = range.start,
                block_end = range.end,
                "no turns in summary range"
            );
            return Ok(None);
        }
        if turns.len() as u64 != range.len() {
            // Unpaired turns shift the ordinal arithmetic; summarize what is there.
            tracing::warn!(
                user = %user,
                expected = range.len(),
                found = turns.len(),
                "summary range is short"
            );
        }

        let transcript = render_transcript(&turns);
        let req = CompletionRequest {
            system: None,
            messages: vec![ChatMessage::user(summary_prompt(&transcript))],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let text = self.model.generate(req).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Completion(
                "summary model returned empty text".to_string(),
            ));
        }

        if let Some(existing) = self
            .summaries
            .find_summary_by_start(user, range.start)
            .await?
        {
            tracing::info!(
                user = %user,
                block_start = range.start,
                "summary block created concurrently; keeping stored copy"
            );
            return Ok(Some(existing.summary));
        }

        self.summaries
            .append_summary(SummaryBlock {
                user_id: user,
                block_start: range.start,
                block_end: range.end,
                summary: text.clone(),
            })
            .await?;

        tracing::info!(
            user = %user,
            block_start = range.start,
            block_end = range.end,
            "summary created"
        );
        Ok(Some(text))
    }
}
