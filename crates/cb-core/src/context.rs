//! Context window assembly for a single turn.

use std::sync::Arc;

use crate::{
    config::ConversationConfig,
    domain::{BlockRange, Role, SummaryBlock, Turn, UserId},
    model::types::ChatMessage,
    policy::Tier,
    store::port::{MessageStore, SummaryStore, TurnQuery},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Summary(BlockRange),
    Turn,
}

/// One message of the assembled context. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextEntry {
    pub role: Role,
    pub content: String,
    pub kind: EntryKind,
}

impl ContextEntry {
    /// Summaries are framed as prior grounding, sent with the user role.
    pub fn from_summary(block: &SummaryBlock) -> Self {
        Self {
            role: Role::User,
            content: format!(
                "[CONTEXT messages {}-{}] {}",
                block.block_start, block.block_end, block.summary
            ),
            kind: EntryKind::Summary(block.range()),
        }
    }

    pub fn from_turn(turn: Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content,
            kind: EntryKind::Turn,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.kind, EntryKind::Summary(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextSource {
    RawWindow,
    Summarized { blocks: usize },
}

/// Why a premium turn ran on the raw window only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DegradedReason {
    SummarizationFailed(String),
    SummaryReadFailed(String),
}

#[derive(Clone, Debug)]
pub struct AssembledContext {
    pub entries: Vec<ContextEntry>,
    pub source: ContextSource,
    pub degraded: Option<DegradedReason>,
}

impl AssembledContext {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Completion messages with the current user message appended last.
    pub fn into_messages(self, current: &str) -> Vec<ChatMessage> {
        let mut out: Vec<ChatMessage> = self
            .entries
            .into_iter()
            .map(|e| ChatMessage {
                role: e.role,
                content: e.content,
            })
            .collect();
        out.push(ChatMessage::user(current));
        out
    }
}

pub struct ContextAssembler {
    messages: Arc<dyn MessageStore>,
    summaries: Arc<dyn SummaryStore>,
    recent_limit: usize,
}

impl ContextAssembler {
    pub fn new(
        cfg: &ConversationConfig,
        messages: Arc<dyn MessageStore>,
        summaries: Arc<dyn SummaryStore>,
    ) -> Self {
        Self {
            messages,
            summaries,
            recent_limit: cfg.recent_limit,
        }
    }

    /// Build the context for `user` on `tier`.
    ///
    /// Free: the newest `recent_limit` turns, oldest first.
    /// Premium: every summary block (oldest first) followed by the same window.
    /// A failed summary read degrades to the free-tier result; only a failed
    /// window read is an error.
    pub async fn load_context(&self, user: UserId, tier: Tier) -> Result<AssembledContext> {
        match tier {
            Tier::Free => self.raw_context(user, None).await,
            Tier::Premium => self.summarized_context(user).await,
        }
    }

    /// The free-tier window, tagged with the reason a premium turn fell back to it.
    pub async fn raw_context(
        &self,
        user: UserId,
        degraded: Option<DegradedReason>,
    ) -> Result<AssembledContext> {
        let entries = self.recent_window(user).await?;
        tracing::debug!(
            user = %user,
            entries = entries.len(),
            degraded = degraded.is_some(),
            "context: raw window"
        );
        Ok(AssembledContext {
            entries,
            source: ContextSource::RawWindow,
            degraded,
        })
    }

    async fn summarized_context(&self, user: UserId) -> Result<AssembledContext> {
        let blocks = match self.summaries.query_summaries(user).await {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::warn!(
                    user = %user,
                    error = %e,
                    "summary read failed; falling back to raw window"
                );
                return self
                    .raw_context(user, Some(DegradedReason::SummaryReadFailed(e.to_string())))
                    .await;
            }
        };

        let mut entries: Vec<ContextEntry> = blocks.iter().map(ContextEntry::from_summary).collect();
        entries.extend(self.recent_window(user).await?);

        tracing::debug!(
            user = %user,
            blocks = blocks.len(),
            entries = entries.len(),
            "context: summarized"
        );
        Ok(AssembledContext {
            entries,
            source: ContextSource::Summarized {
                blocks: blocks.len(),
            },
            degraded: None,
        })
    }

    async fn recent_window(&self, user: UserId) -> Result<Vec<ContextEntry>> {
        let mut turns = self
            .messages
            .query_turns(user, TurnQuery::recent(self.recent_limit))
            .await?;
        turns.reverse();
        Ok(turns.into_iter().map(ContextEntry::from_turn).collect())
    }
}
