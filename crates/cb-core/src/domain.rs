use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a stored turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Speaker label used when rendering a transcript for summarization.
    pub fn transcript_label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Coach",
        }
    }
}

/// One stored message in a user's conversation log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_id: UserId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append payload for [`crate::store::MessageStore::append_turn`].
#[derive(Clone, Debug)]
pub struct NewTurn {
    pub user_id: UserId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl NewTurn {
    pub fn new(user_id: UserId, role: Role, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role,
            content: content.into(),
            created_at: at,
        }
    }
}

/// Inclusive, 1-based ordinal range over a user's turn sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn len(&self) -> u64 {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Compressed representation of a contiguous range of turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryBlock {
    pub user_id: UserId,
    pub block_start: u64,
    pub block_end: u64,
    pub summary: String,
}

impl SummaryBlock {
    pub fn range(&self) -> BlockRange {
        BlockRange {
            start: self.block_start,
            end: self.block_end,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Premium,
    Pro,
}

impl Plan {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "premium" => Ok(Plan::Premium),
            "pro" => Ok(Plan::Pro),
            other => Err(Error::invalid("plan", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Plan::Premium => "Premium",
            Plan::Pro => "Pro",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(Error::invalid("subscription status", other)),
        }
    }
}

/// Subscription record as returned by [`crate::store::SubscriptionSource`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub expires_at: DateTime<Utc>,
}
