use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{NewTurn, Role, Subscription, SummaryBlock, Turn, UserId},
    store::port::{
        MessageStore, Order, PreferenceStore, SubscriptionSource, SummaryStore, TurnQuery,
    },
    tone::Tone,
    Result,
};

#[derive(Clone, Debug)]
struct StoredTurn {
    seq: u64,
    turn: Turn,
}

#[derive(Debug, Default)]
struct Tables {
    next_seq: u64,
    turns: HashMap<UserId, Vec<StoredTurn>>,
    summaries: HashMap<UserId, Vec<SummaryBlock>>,
    tones: HashMap<UserId, Tone>,
    subscriptions: HashMap<UserId, Subscription>,
}

/// In-process implementation of every store port.
///
/// Used by the console driver and tests. Summary blocks are unique per
/// `(user, block_start)`: a second insert for the same start is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_subscription(&self, user: UserId, sub: Subscription) {
        self.tables.lock().await.subscriptions.insert(user, sub);
    }

    pub async fn remove_subscription(&self, user: UserId) {
        self.tables.lock().await.subscriptions.remove(&user);
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_turn(&self, turn: NewTurn) -> Result<()> {
        let mut t = self.tables.lock().await;
        let seq = t.next_seq;
        t.next_seq += 1;
        t.turns.entry(turn.user_id).or_default().push(StoredTurn {
            seq,
            turn: Turn {
                user_id: turn.user_id,
                role: turn.role,
                content: turn.content,
                created_at: turn.created_at,
            },
        });
        Ok(())
    }

    async fn query_turns(&self, user: UserId, query: TurnQuery) -> Result<Vec<Turn>> {
        let t = self.tables.lock().await;
        let Some(rows) = t.turns.get(&user) else {
            return Ok(Vec::new());
        };

        let mut sorted: Vec<&StoredTurn> = rows.iter().collect();
        sorted.sort_by_key(|r| (r.turn.created_at, r.seq));
        if query.order == Order::Desc {
            sorted.reverse();
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(sorted
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .map(|r| r.turn.clone())
            .collect())
    }

    async fn count_turns(&self, user: UserId, role: Option<Role>) -> Result<u64> {
        let t = self.tables.lock().await;
        let count = t
            .turns
            .get(&user)
            .map(|rows| {
                rows.iter()
                    .filter(|r| role.map_or(true, |role| r.turn.role == role))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn clear_turns(&self, user: UserId) -> Result<()> {
        self.tables.lock().await.turns.remove(&user);
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn append_summary(&self, block: SummaryBlock) -> Result<()> {
        let mut t = self.tables.lock().await;
        let blocks = t.summaries.entry(block.user_id).or_default();
        if blocks.iter().any(|b| b.block_start == block.block_start) {
            tracing::warn!(
                user = %block.user_id,
                block_start = block.block_start,
                "summary block already stored; dropping duplicate insert"
            );
            return Ok(());
        }
        blocks.push(block);
        blocks.sort_by_key(|b| b.block_start);
        Ok(())
    }

    async fn query_summaries(&self, user: UserId) -> Result<Vec<SummaryBlock>> {
        let t = self.tables.lock().await;
        Ok(t.summaries.get(&user).cloned().unwrap_or_default())
    }

    async fn find_summary_by_start(
        &self,
        user: UserId,
        block_start: u64,
    ) -> Result<Option<SummaryBlock>> {
        let t = self.tables.lock().await;
        Ok(t.summaries
            .get(&user)
            .and_then(|blocks| blocks.iter().find(|b| b.block_start == block_start))
            .cloned())
    }

    async fn clear_summaries(&self, user: UserId) -> Result<()> {
        self.tables.lock().await.summaries.remove(&user);
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_tone(&self, user: UserId) -> Result<Option<Tone>> {
        Ok(self.tables.lock().await.tones.get(&user).copied())
    }

    async fn set_tone(&self, user: UserId, tone: Tone) -> Result<()> {
        self.tables.lock().await.tones.insert(user, tone);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionSource for MemoryStore {
    async fn get_active(&self, user: UserId) -> Result<Option<Subscription>> {
        Ok(self.tables.lock().await.subscriptions.get(&user).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BlockRange;
    use chrono::{Duration, TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn query_sorts_by_timestamp_not_insertion() {
        let store = MemoryStore::new();
        let u = UserId(7);
        store
            .append_turn(NewTurn::new(u, Role::User, "third", at(30)))
            .await
            .unwrap();
        store
            .append_turn(NewTurn::new(u, Role::User, "first", at(10)))
            .await
            .unwrap();
        store
            .append_turn(NewTurn::new(u, Role::Assistant, "second", at(20)))
            .await
            .unwrap();

        let asc = store.query_turns(u, TurnQuery::all()).await.unwrap();
        let contents: Vec<_> = asc.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);

        let recent = store.query_turns(u, TurnQuery::recent(2)).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let u = UserId(1);
        let now = at(0);
        store
            .append_turn(NewTurn::new(u, Role::User, "question", now))
            .await
            .unwrap();
        store
            .append_turn(NewTurn::new(u, Role::Assistant, "answer", now))
            .await
            .unwrap();

        let asc = store.query_turns(u, TurnQuery::all()).await.unwrap();
        assert_eq!(asc[0].role, Role::User);
        assert_eq!(asc[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn ordinal_range_is_one_based_inclusive() {
        let store = MemoryStore::new();
        let u = UserId(1);
        let base = at(0);
        for i in 0..10 {
            store
                .append_turn(NewTurn::new(
                    u,
                    Role::User,
                    format!("m{}", i + 1),
                    base + Duration::seconds(i),
                ))
                .await
                .unwrap();
        }

        let turns = store
            .query_turns(u, TurnQuery::ordinal_range(BlockRange { start: 3, end: 5 }))
            .await
            .unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn count_filters_by_role_and_users_are_isolated() {
        let store = MemoryStore::new();
        store
            .append_turn(NewTurn::new(UserId(1), Role::User, "a", at(0)))
            .await
            .unwrap();
        store
            .append_turn(NewTurn::new(UserId(1), Role::Assistant, "b", at(1)))
            .await
            .unwrap();
        store
            .append_turn(NewTurn::new(UserId(2), Role::User, "c", at(2)))
            .await
            .unwrap();

        assert_eq!(store.count_turns(UserId(1), None).await.unwrap(), 2);
        assert_eq!(
            store.count_turns(UserId(1), Some(Role::User)).await.unwrap(),
            1
        );
        assert_eq!(store.count_turns(UserId(3), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_summary_start_is_dropped() {
        let store = MemoryStore::new();
        let u = UserId(1);
        let block = |text: &str| SummaryBlock {
            user_id: u,
            block_start: 1,
            block_end: 100,
            summary: text.to_string(),
        };
        store.append_summary(block("first")).await.unwrap();
        store.append_summary(block("second")).await.unwrap();

        let all = store.query_summaries(u).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].summary, "first");
    }

    #[tokio::test]
    async fn summaries_come_back_ordered_by_start() {
        let store = MemoryStore::new();
        let u = UserId(1);
        for start in [101, 1] {
            store
                .append_summary(SummaryBlock {
                    user_id: u,
                    block_start: start,
                    block_end: start + 99,
                    summary: format!("s{start}"),
                })
                .await
                .unwrap();
        }
        let starts: Vec<_> = store
            .query_summaries(u)
            .await
            .unwrap()
            .iter()
            .map(|b| b.block_start)
            .collect();
        assert_eq!(starts, vec![1, 101]);
        assert!(store.find_summary_by_start(u, 101).await.unwrap().is_some());
        assert!(store.find_summary_by_start(u, 201).await.unwrap().is_none());
    }
}
