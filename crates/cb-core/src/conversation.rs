//! Per-message pipeline: tier check, summarization, context, completion, persistence.
//!
//! Each call is independent and holds no lock across store or model calls, so
//! duplicate deliveries for the same user may run concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::ConversationConfig,
    context::{ContextAssembler, ContextSource, DegradedReason},
    domain::{NewTurn, Plan, Role, UserId},
    errors::Error,
    model::{client::CompletionClient, types::CompletionRequest},
    policy::{QuotaStatus, Tier, TierPolicy},
    store::port::{MessageStore, PreferenceStore, SubscriptionSource, SummaryStore},
    summarizer::Summarizer,
    tone::{Tone, ToneSelection, ToneService},
    Result,
};

/// Store and model ports the pipeline runs against.
#[derive(Clone)]
pub struct Ports {
    pub messages: Arc<dyn MessageStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub subscriptions: Arc<dyn SubscriptionSource>,
    pub model: Arc<dyn CompletionClient>,
}

/// Informational notice for a free user close to the quota.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaWarning {
    pub remaining: u64,
}

#[derive(Clone, Debug)]
pub struct Reply {
    pub text: String,
    pub tier: Tier,
    pub tone: Tone,
    pub warning: Option<QuotaWarning>,
    pub context_source: ContextSource,
    pub context_len: usize,
    pub degraded: Option<DegradedReason>,
}

#[derive(Clone, Debug)]
pub enum TurnOutcome {
    Replied(Reply),
    /// Free quota used up; nothing was sent to the model or stored.
    QuotaExhausted { quota: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserStats {
    pub tier: Tier,
    pub plan: Option<Plan>,
    pub expires_at: Option<DateTime<Utc>>,
    pub total_turns: u64,
    pub user_turns: u64,
    pub assistant_turns: u64,
    /// Free messages left; `None` for premium users.
    pub remaining_free: Option<u64>,
}

pub struct ConversationService {
    cfg: ConversationConfig,
    policy: TierPolicy,
    ports: Ports,
    summarizer: Summarizer,
    assembler: ContextAssembler,
    tones: ToneService,
}

impl ConversationService {
    pub fn new(cfg: ConversationConfig, ports: Ports) -> Result<Self> {
        cfg.validate()?;
        let summarizer = Summarizer::new(
            &cfg,
            ports.messages.clone(),
            ports.summaries.clone(),
            ports.model.clone(),
        );
        let assembler =
            ContextAssembler::new(&cfg, ports.messages.clone(), ports.summaries.clone());
        let tones = ToneService::new(ports.preferences.clone());

        Ok(Self {
            policy: TierPolicy::from(&cfg),
            cfg,
            ports,
            summarizer,
            assembler,
            tones,
        })
    }

    /// Tier evaluated now; never cached.
    pub async fn tier(&self, user: UserId) -> Result<Tier> {
        let sub = self.ports.subscriptions.get_active(user).await?;
        Ok(Tier::from_subscription(sub.as_ref(), Utc::now()))
    }

    pub async fn handle_message(&self, user: UserId, text: &str) -> Result<TurnOutcome> {
        let tier = self.tier(user).await?;

        let mut warning = None;
        if !tier.is_premium() {
            let user_turns = self
                .ports
                .messages
                .count_turns(user, Some(Role::User))
                .await?;
            match self.policy.check_quota(tier, user_turns) {
                QuotaStatus::Exhausted { quota } => {
                    tracing::info!(user = %user, user_turns, quota, "free quota exhausted");
                    return Ok(TurnOutcome::QuotaExhausted { quota });
                }
                QuotaStatus::NearLimit { remaining } => {
                    tracing::info!(user = %user, user_turns, remaining, "free quota near limit");
                    warning = Some(QuotaWarning { remaining });
                }
                QuotaStatus::Allowed => {}
            }
        }

        // History is read before the current message is stored so it is not
        // duplicated into its own context.
        let context = match tier {
            Tier::Free => self.assembler.load_context(user, tier).await?,
            Tier::Premium => match self.summarizer.maybe_create_summary(user).await {
                Ok(_) => self.assembler.load_context(user, tier).await?,
                Err(e) => {
                    tracing::warn!(
                        user = %user,
                        error = %e,
                        "summarization failed; using raw window"
                    );
                    self.assembler
                        .raw_context(user, Some(DegradedReason::SummarizationFailed(e.to_string())))
                        .await?
                }
            },
        };

        let tone = self.tones.current(user).await?;
        let context_source = context.source;
        let context_len = context.len();
        let degraded = context.degraded.clone();
        tracing::info!(
            user = %user,
            tier = tier.as_str(),
            tone = tone.as_str(),
            context_len,
            degraded = degraded.is_some(),
            "context loaded"
        );

        let started = std::time::Instant::now();
        let reply = self
            .ports
            .model
            .generate(CompletionRequest {
                system: Some(tone.system_prompt()),
                messages: context.into_messages(text),
                max_tokens: self.cfg.reply_max_tokens,
                temperature: self.cfg.reply_temperature,
            })
            .await?;
        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(Error::Completion("model returned empty reply".to_string()));
        }
        tracing::info!(
            user = %user,
            elapsed_ms = started.elapsed().as_millis() as u64,
            words = reply.split_whitespace().count(),
            "reply generated"
        );

        let now = Utc::now();
        self.ports
            .messages
            .append_turn(NewTurn::new(user, Role::User, text, now))
            .await?;
        self.ports
            .messages
            .append_turn(NewTurn::new(user, Role::Assistant, reply.clone(), now))
            .await?;

        Ok(TurnOutcome::Replied(Reply {
            text: reply,
            tier,
            tone,
            warning,
            context_source,
            context_len,
            degraded,
        }))
    }

    /// Delete the user's turns and every summary derived from them.
    pub async fn clear_history(&self, user: UserId) -> Result<()> {
        self.ports.messages.clear_turns(user).await?;
        self.ports.summaries.clear_summaries(user).await?;
        tracing::info!(user = %user, "history cleared");
        Ok(())
    }

    pub async fn stats(&self, user: UserId) -> Result<UserStats> {
        let sub = self.ports.subscriptions.get_active(user).await?;
        let tier = Tier::from_subscription(sub.as_ref(), Utc::now());
        let user_turns = self
            .ports
            .messages
            .count_turns(user, Some(Role::User))
            .await?;
        let assistant_turns = self
            .ports
            .messages
            .count_turns(user, Some(Role::Assistant))
            .await?;

        let (plan, expires_at) = match (&sub, tier) {
            (Some(s), Tier::Premium) => (Some(s.plan), Some(s.expires_at)),
            _ => (None, None),
        };

        Ok(UserStats {
            tier,
            plan,
            expires_at,
            total_turns: user_turns + assistant_turns,
            user_turns,
            assistant_turns,
            remaining_free: (!tier.is_premium()).then(|| self.policy.remaining_free(user_turns)),
        })
    }

    pub async fn current_tone(&self, user: UserId) -> Result<Tone> {
        self.tones.current(user).await
    }

    pub async fn select_tone(&self, user: UserId, tone: Tone) -> Result<ToneSelection> {
        let tier = self.tier(user).await?;
        self.tones.select(user, tone, tier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SubscriptionStatus, Subscription, SummaryBlock, Turn};
    use crate::errors::ErrorKind;
    use crate::model::types::ChatMessage;
    use crate::store::memory::MemoryStore;
    use crate::store::port::TurnQuery;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Replies with a fixed text; summary requests are told apart by the missing system prompt.
    #[derive(Default)]
    struct ScriptedModel {
        requests: Mutex<Vec<CompletionRequest>>,
        fail_replies: bool,
        fail_summaries: bool,
    }

    impl ScriptedModel {
        fn reply_requests(&self) -> Vec<CompletionRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.system.is_some())
                .cloned()
                .collect()
        }

        fn summary_calls(&self) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.system.is_none())
                .count()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedModel {
        async fn generate(&self, req: CompletionRequest) -> Result<String> {
            let is_summary = req.system.is_none();
            self.requests.lock().unwrap().push(req);
            match (is_summary, self.fail_summaries, self.fail_replies) {
                (true, true, _) => Err(Error::Completion("summary timeout".to_string())),
                (true, false, _) => Ok("summary text".to_string()),
                (false, _, true) => Err(Error::Completion("upstream 529".to_string())),
                (false, _, false) => Ok("What's weighing on you most?".to_string()),
            }
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        model: Arc<ScriptedModel>,
        svc: ConversationService,
    }

    fn harness(model: ScriptedModel) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(model);
        let ports = Ports {
            messages: store.clone(),
            summaries: store.clone(),
            preferences: store.clone(),
            subscriptions: store.clone(),
            model: model.clone(),
        };
        let svc = ConversationService::new(ConversationConfig::default(), ports).unwrap();
        Harness { store, model, svc }
    }

    const U: UserId = UserId(5);

    async fn make_premium(store: &MemoryStore) {
        store
            .put_subscription(
                U,
                Subscription {
                    plan: Plan::Premium,
                    status: SubscriptionStatus::Active,
                    expires_at: Utc::now() + Duration::days(30),
                },
            )
            .await;
    }

    async fn seed_pairs(store: &MemoryStore, pairs: usize) {
        let base = Utc::now() - Duration::days(1);
        for i in 0..pairs {
            let at = base + Duration::seconds(i as i64 * 2);
            store
                .append_turn(NewTurn::new(U, Role::User, format!("u{i}"), at))
                .await
                .unwrap();
            store
                .append_turn(NewTurn::new(
                    U,
                    Role::Assistant,
                    format!("a{i}"),
                    at + Duration::seconds(1),
                ))
                .await
                .unwrap();
        }
    }

    async fn all_turns(store: &MemoryStore) -> Vec<Turn> {
        store.query_turns(U, TurnQuery::all()).await.unwrap()
    }

    fn replied(out: TurnOutcome) -> Reply {
        match out {
            TurnOutcome::Replied(r) => r,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn free_turn_sends_history_then_message_and_persists_pair() {
        let h = harness(ScriptedModel::default());
        seed_pairs(&h.store, 2).await;

        let reply = replied(h.svc.handle_message(U, "I'm tired").await.unwrap());
        assert_eq!(reply.text, "What's weighing on you most?");
        assert_eq!(reply.tier, Tier::Free);
        assert_eq!(reply.tone, Tone::Baddy);
        assert_eq!(reply.context_len, 4);
        assert_eq!(reply.warning, None);

        let reqs = h.model.reply_requests();
        assert_eq!(reqs.len(), 1);
        let msgs = &reqs[0].messages;
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[4], ChatMessage::user("I'm tired"));
        assert_eq!(reqs[0].system.as_deref(), Some(Tone::Baddy.system_prompt().as_str()));
        assert_eq!(reqs[0].max_tokens, 300);

        let turns = all_turns(&h.store).await;
        assert_eq!(turns.len(), 6);
        assert_eq!(turns[4].content, "I'm tired");
        assert_eq!(turns[4].role, Role::User);
        assert_eq!(turns[5].role, Role::Assistant);
    }

    #[tokio::test]
    async fn free_quota_blocks_without_model_call() {
        let h = harness(ScriptedModel::default());
        seed_pairs(&h.store, 50).await;

        let out = h.svc.handle_message(U, "one more").await.unwrap();
        assert!(matches!(out, TurnOutcome::QuotaExhausted { quota: 50 }));
        assert!(h.model.requests.lock().unwrap().is_empty());
        assert_eq!(all_turns(&h.store).await.len(), 100);
    }

    #[tokio::test]
    async fn near_limit_warning_only_at_exact_count() {
        let h = harness(ScriptedModel::default());
        seed_pairs(&h.store, 45).await;

        let first = replied(h.svc.handle_message(U, "hello").await.unwrap());
        assert_eq!(first.warning, Some(QuotaWarning { remaining: 5 }));

        let second = replied(h.svc.handle_message(U, "again").await.unwrap());
        assert_eq!(second.warning, None);
    }

    #[tokio::test]
    async fn premium_turn_summarizes_at_boundary_and_uses_summary() {
        let h = harness(ScriptedModel::default());
        make_premium(&h.store).await;
        seed_pairs(&h.store, 50).await;

        let reply = replied(h.svc.handle_message(U, "next").await.unwrap());
        assert_eq!(reply.tier, Tier::Premium);
        assert_eq!(reply.context_source, ContextSource::Summarized { blocks: 1 });
        assert_eq!(reply.context_len, 51);
        assert_eq!(h.model.summary_calls(), 1);

        let reqs = h.model.reply_requests();
        assert_eq!(reqs[0].messages[0].content, "[CONTEXT messages 1-100] summary text");

        // 51 user messages now; no new block is due.
        replied(h.svc.handle_message(U, "after").await.unwrap());
        assert_eq!(h.model.summary_calls(), 1);
    }

    #[tokio::test]
    async fn premium_is_not_quota_limited() {
        let h = harness(ScriptedModel::default());
        make_premium(&h.store).await;
        seed_pairs(&h.store, 60).await;

        let reply = replied(h.svc.handle_message(U, "still here").await.unwrap());
        assert_eq!(reply.warning, None);
    }

    #[tokio::test]
    async fn summarization_failure_degrades_instead_of_failing() {
        let h = harness(ScriptedModel {
            fail_summaries: true,
            ..Default::default()
        });
        make_premium(&h.store).await;
        seed_pairs(&h.store, 50).await;
        h.store
            .append_summary(SummaryBlock {
                user_id: U,
                block_start: 1001,
                block_end: 1100,
                summary: "unrelated".to_string(),
            })
            .await
            .unwrap();

        let reply = replied(h.svc.handle_message(U, "hi").await.unwrap());
        assert_eq!(reply.context_source, ContextSource::RawWindow);
        assert!(matches!(
            reply.degraded,
            Some(DegradedReason::SummarizationFailed(_))
        ));
        assert_eq!(reply.context_len, 50);
        assert_eq!(all_turns(&h.store).await.len(), 102);
    }

    #[tokio::test]
    async fn completion_failure_surfaces_and_stores_nothing() {
        let h = harness(ScriptedModel {
            fail_replies: true,
            ..Default::default()
        });
        seed_pairs(&h.store, 1).await;

        let err = h.svc.handle_message(U, "hello?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Completion);
        assert_eq!(all_turns(&h.store).await.len(), 2);
    }

    #[tokio::test]
    async fn expired_subscription_counts_as_free() {
        let h = harness(ScriptedModel::default());
        h.store
            .put_subscription(
                U,
                Subscription {
                    plan: Plan::Pro,
                    status: SubscriptionStatus::Active,
                    expires_at: Utc::now() - Duration::minutes(1),
                },
            )
            .await;
        seed_pairs(&h.store, 50).await;

        let out = h.svc.handle_message(U, "hey").await.unwrap();
        assert!(matches!(out, TurnOutcome::QuotaExhausted { .. }));
    }

    #[tokio::test]
    async fn clear_history_removes_turns_and_summaries() {
        let h = harness(ScriptedModel::default());
        make_premium(&h.store).await;
        seed_pairs(&h.store, 50).await;
        replied(h.svc.handle_message(U, "go").await.unwrap());
        assert_eq!(h.store.query_summaries(U).await.unwrap().len(), 1);

        h.svc.clear_history(U).await.unwrap();
        assert!(all_turns(&h.store).await.is_empty());
        assert!(h.store.query_summaries(U).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_report_counts_and_remaining() {
        let h = harness(ScriptedModel::default());
        seed_pairs(&h.store, 12).await;

        let stats = h.svc.stats(U).await.unwrap();
        assert_eq!(stats.tier, Tier::Free);
        assert_eq!(stats.total_turns, 24);
        assert_eq!(stats.user_turns, 12);
        assert_eq!(stats.assistant_turns, 12);
        assert_eq!(stats.remaining_free, Some(38));
        assert_eq!(stats.plan, None);

        make_premium(&h.store).await;
        let stats = h.svc.stats(U).await.unwrap();
        assert_eq!(stats.plan, Some(Plan::Premium));
        assert_eq!(stats.remaining_free, None);
        assert!(stats.expires_at.is_some());
    }

    #[tokio::test]
    async fn tone_selection_follows_live_tier() {
        let h = harness(ScriptedModel::default());
        assert_eq!(
            h.svc.select_tone(U, Tone::Mentor).await.unwrap(),
            ToneSelection::RequiresPremium(Tone::Mentor)
        );

        make_premium(&h.store).await;
        assert_eq!(
            h.svc.select_tone(U, Tone::Mentor).await.unwrap(),
            ToneSelection::Applied(Tone::Mentor)
        );
        assert_eq!(h.svc.current_tone(U).await.unwrap(), Tone::Mentor);

        let reply = replied(h.svc.handle_message(U, "plan my week").await.unwrap());
        assert_eq!(reply.tone, Tone::Mentor);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ports = Ports {
            messages: store.clone(),
            summaries: store.clone(),
            preferences: store.clone(),
            subscriptions: store,
            model: Arc::new(ScriptedModel::default()),
        };
        let cfg = ConversationConfig {
            recent_limit: 0,
            ..Default::default()
        };
        assert!(ConversationService::new(cfg, ports).is_err());
    }
}
