use async_trait::async_trait;

use crate::{
    domain::{BlockRange, NewTurn, Role, Subscription, SummaryBlock, Turn, UserId},
    tone::Tone,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Ordered slice of a user's turns.
///
/// `offset` and `limit` apply after sorting by `(created_at, insertion order)`
/// in the requested direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnQuery {
    pub order: Order,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl TurnQuery {
    pub fn all() -> Self {
        Self {
            order: Order::Asc,
            offset: 0,
            limit: None,
        }
    }

    /// The newest `limit` turns, newest first.
    pub fn recent(limit: usize) -> Self {
        Self {
            order: Order::Desc,
            offset: 0,
            limit: Some(limit),
        }
    }

    /// Turns at 1-based ordinals `range.start..=range.end`, oldest first.
    pub fn ordinal_range(range: BlockRange) -> Self {
        Self {
            order: Order::Asc,
            offset: range.start.saturating_sub(1) as usize,
            limit: Some(range.len() as usize),
        }
    }
}

/// Append-only conversation log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_turn(&self, turn: NewTurn) -> Result<()>;

    async fn query_turns(&self, user: UserId, query: TurnQuery) -> Result<Vec<Turn>>;

    /// Count turns, optionally restricted to one role.
    async fn count_turns(&self, user: UserId, role: Option<Role>) -> Result<u64>;

    /// History clear. Callers must clear summaries as well.
    async fn clear_turns(&self, user: UserId) -> Result<()>;
}

/// Durable per-user summary blocks.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn append_summary(&self, block: SummaryBlock) -> Result<()>;

    /// All blocks for the user, ordered by `block_start` ascending.
    async fn query_summaries(&self, user: UserId) -> Result<Vec<SummaryBlock>>;

    async fn find_summary_by_start(
        &self,
        user: UserId,
        block_start: u64,
    ) -> Result<Option<SummaryBlock>>;

    async fn clear_summaries(&self, user: UserId) -> Result<()>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_tone(&self, user: UserId) -> Result<Option<Tone>>;

    async fn set_tone(&self, user: UserId, tone: Tone) -> Result<()>;
}

#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// The user's current subscription record, if any.
    ///
    /// Whether it still grants premium is decided by [`crate::policy::is_premium`].
    async fn get_active(&self, user: UserId) -> Result<Option<Subscription>>;
}
