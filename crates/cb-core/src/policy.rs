//! Subscription tier and free-quota policy.
//!
//! Pure decisions only; callers supply the subscription record, the current
//! time and the user's lifetime message count.

use chrono::{DateTime, Utc};

use crate::{
    config::ConversationConfig,
    domain::{Subscription, SubscriptionStatus},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn from_subscription(sub: Option<&Subscription>, now: DateTime<Utc>) -> Self {
        if is_premium(sub, now) {
            Tier::Premium
        } else {
            Tier::Free
        }
    }

    pub fn is_premium(self) -> bool {
        self == Tier::Premium
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

/// Active and not yet expired at `now`. No grace period.
pub fn is_premium(sub: Option<&Subscription>, now: DateTime<Utc>) -> bool {
    match sub {
        Some(s) => s.status == SubscriptionStatus::Active && s.expires_at > now,
        None => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaStatus {
    Allowed,
    /// Emitted on exactly one message: when the count equals `quota - margin`.
    NearLimit { remaining: u64 },
    Exhausted { quota: u64 },
}

/// Free-tier quota over the lifetime count of user-authored turns.
///
/// The count never decays: a free user who has sent `free_quota` messages is
/// blocked until they upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierPolicy {
    pub free_quota: u64,
    pub warning_margin: u64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free_quota: 50,
            warning_margin: 5,
        }
    }
}

impl From<&ConversationConfig> for TierPolicy {
    fn from(cfg: &ConversationConfig) -> Self {
        Self {
            free_quota: cfg.free_quota,
            warning_margin: cfg.warning_margin,
        }
    }
}

impl TierPolicy {
    pub fn is_over_quota(&self, user_turns: u64) -> bool {
        user_turns >= self.free_quota
    }

    pub fn is_near_limit(&self, user_turns: u64) -> bool {
        self.free_quota >= self.warning_margin
            && user_turns == self.free_quota - self.warning_margin
    }

    pub fn remaining_free(&self, user_turns: u64) -> u64 {
        self.free_quota.saturating_sub(user_turns)
    }

    pub fn check_quota(&self, tier: Tier, user_turns: u64) -> QuotaStatus {
        match tier {
            Tier::Premium => QuotaStatus::Allowed,
            Tier::Free if self.is_over_quota(user_turns) => QuotaStatus::Exhausted {
                quota: self.free_quota,
            },
            Tier::Free if self.is_near_limit(user_turns) => QuotaStatus::NearLimit {
                remaining: self.warning_margin,
            },
            Tier::Free => QuotaStatus::Allowed,
        }
    }
}
