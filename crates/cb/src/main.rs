use std::sync::Arc;

use anyhow::Context as _;
use chrono::{Duration, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};

use cb_anthropic::{AnthropicClient, AnthropicConfig};
use cb_core::{
    config::Config,
    conversation::{ConversationService, Ports, TurnOutcome},
    domain::{Plan, Subscription, SubscriptionStatus, UserId},
    store::memory::MemoryStore,
    tone::{Tone, ToneSelection},
};

/// Local console driver: one user, in-memory history, real completion model.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cb_core::logging::init("cb")?;

    let cfg = Config::load()?;
    let user = UserId(cfg.console_user_id);

    let store = Arc::new(MemoryStore::new());
    if let Some(days) = cfg.console_premium_days {
        store
            .put_subscription(
                user,
                Subscription {
                    plan: Plan::Premium,
                    status: SubscriptionStatus::Active,
                    expires_at: Utc::now() + Duration::days(days),
                },
            )
            .await;
    }

    let model = Arc::new(AnthropicClient::new(AnthropicConfig {
        api_key: cfg.anthropic_api_key.clone(),
        model: cfg.anthropic_model.clone(),
        base_url: cfg.anthropic_base_url.clone(),
        timeout: cfg.completion_timeout,
    })?);

    let svc = ConversationService::new(
        cfg.conversation.clone(),
        Ports {
            messages: store.clone(),
            summaries: store.clone(),
            preferences: store.clone(),
            subscriptions: store,
            model,
        },
    )?;

    tracing::info!(user = %user, model = %cfg.anthropic_model, "console session started");
    println!("Type a message. Commands: /stats, /clear, /tone [focused|baddy|mentor], /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }
        if let Err(e) = run_line(&svc, user, text).await {
            tracing::error!(error = %e, "turn failed");
            println!("Sorry, something went wrong. Please try again in a moment.");
        }
    }

    Ok(())
}

async fn run_line(svc: &ConversationService, user: UserId, text: &str) -> cb_core::Result<()> {
    match text.split_once(' ').map_or((text, ""), |(c, a)| (c, a.trim())) {
        ("/stats", _) => {
            let s = svc.stats(user).await?;
            match (s.plan, s.expires_at, s.remaining_free) {
                (Some(plan), Some(exp), _) => {
                    println!("Plan: {} (until {})", plan.label(), exp.format("%Y-%m-%d"))
                }
                (_, _, remaining) => println!(
                    "Plan: FREE ({} messages left)",
                    remaining.unwrap_or_default()
                ),
            }
            println!(
                "Messages: {} total, {} yours, {} from the coach",
                s.total_turns, s.user_turns, s.assistant_turns
            );
        }
        ("/clear", _) => {
            svc.clear_history(user).await?;
            println!("Chat history cleared. Fresh start.");
        }
        ("/tone", "") => {
            let current = svc.current_tone(user).await?;
            println!("Current tone: {}", current.label());
            for t in Tone::ALL {
                println!("  {} - {}", t.as_str(), t.description());
            }
        }
        ("/tone", name) => {
            let tone = Tone::parse(name)?;
            match svc.select_tone(user, tone).await? {
                ToneSelection::Applied(t) => println!("Tone set: {} - {}", t.label(), t.description()),
                ToneSelection::RequiresPremium(t) => {
                    println!("{} is available with Premium.", t.label())
                }
            }
        }
        _ => match svc.handle_message(user, text).await? {
            TurnOutcome::QuotaExhausted { quota } => {
                println!("You reached the FREE limit ({quota} messages).");
            }
            TurnOutcome::Replied(reply) => {
                if let Some(w) = reply.warning {
                    println!("[{} FREE messages left]", w.remaining);
                }
                println!("{}", reply.text);
            }
        },
    }
    Ok(())
}
