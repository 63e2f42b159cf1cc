//! Session guard — quota and abuse gate.
//!
//! Runs before everything else in the turn. All counters are bumped and
//! compared under one lock acquisition, so concurrent requests from the same
//! user cannot slip past a limit between a read and a write. The increment
//! stands even when the check denies.

use aula_config::GuardConfig;
use aula_core::message::{ConversationId, TenantId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// The outcome of a guard check.
#[derive(Debug, Clone)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GuardDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Default)]
struct GuardState {
    /// (tenant, user) → (UTC day, messages sent that day)
    daily: HashMap<(String, String), (NaiveDate, u32)>,
    /// conversation → turns taken
    turns: HashMap<String, u32>,
    /// (tenant, user) → last message instant
    last_seen: HashMap<(String, String), DateTime<Utc>>,
}

/// Enforces per-user/day quotas, per-conversation turn caps, and cooldowns.
pub struct SessionGuard {
    config: GuardConfig,
    state: Mutex<GuardState>,
}

impl SessionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GuardState::default()),
        }
    }

    /// Check (and charge) one inbound message.
    pub fn check(
        &self,
        tenant: &TenantId,
        user: &UserId,
        conversation: &ConversationId,
    ) -> GuardDecision {
        let now = Utc::now();
        let today = now.date_naive();
        let user_key = (tenant.to_string(), user.to_string());

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Daily quota: increment-and-compare under the lock.
        let daily = state.daily.entry(user_key.clone()).or_insert((today, 0));
        if daily.0 != today {
            *daily = (today, 0);
        }
        daily.1 += 1;
        let daily_count = daily.1;

        // Conversation turn cap.
        let turns = state.turns.entry(conversation.to_string()).or_insert(0);
        *turns += 1;
        let turn_count = *turns;

        // Cooldown window.
        let previous = state.last_seen.insert(user_key, now);

        drop(state);

        if daily_count > self.config.daily_message_quota {
            debug!(%tenant, %user, daily_count, "Guard: daily quota exceeded");
            return GuardDecision::deny(format!(
                "daily message quota of {} reached",
                self.config.daily_message_quota
            ));
        }

        if turn_count > self.config.conversation_turn_cap {
            debug!(%tenant, %conversation, turn_count, "Guard: conversation turn cap exceeded");
            return GuardDecision::deny(format!(
                "conversation turn cap of {} reached",
                self.config.conversation_turn_cap
            ));
        }

        if self.config.cooldown_secs > 0
            && let Some(prev) = previous
        {
            let elapsed = now.signed_duration_since(prev);
            if elapsed.num_milliseconds() >= 0
                && (elapsed.num_seconds() as u64) < self.config.cooldown_secs
            {
                debug!(%tenant, %user, "Guard: cooldown window active");
                return GuardDecision::deny(format!(
                    "please wait {}s between messages",
                    self.config.cooldown_secs
                ));
            }
        }

        GuardDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(quota: u32, cap: u32, cooldown: u64) -> SessionGuard {
        SessionGuard::new(GuardConfig {
            daily_message_quota: quota,
            conversation_turn_cap: cap,
            cooldown_secs: cooldown,
        })
    }

    fn ids() -> (TenantId, UserId, ConversationId) {
        (
            TenantId::new("t1"),
            UserId::new("u1"),
            ConversationId::new(),
        )
    }

    #[test]
    fn allows_within_limits() {
        let g = guard(10, 10, 0);
        let (t, u, c) = ids();
        let decision = g.check(&t, &u, &c);
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn denies_after_daily_quota() {
        let g = guard(2, 100, 0);
        let (t, u, _) = ids();

        assert!(g.check(&t, &u, &ConversationId::new()).allowed);
        assert!(g.check(&t, &u, &ConversationId::new()).allowed);
        let third = g.check(&t, &u, &ConversationId::new());
        assert!(!third.allowed);
        assert!(third.reason.unwrap().contains("daily message quota"));
    }

    #[test]
    fn quota_is_per_user() {
        let g = guard(1, 100, 0);
        let t = TenantId::new("t1");

        assert!(g.check(&t, &UserId::new("u1"), &ConversationId::new()).allowed);
        assert!(!g.check(&t, &UserId::new("u1"), &ConversationId::new()).allowed);
        // A different user is unaffected.
        assert!(g.check(&t, &UserId::new("u2"), &ConversationId::new()).allowed);
    }

    #[test]
    fn quota_is_tenant_qualified() {
        let g = guard(1, 100, 0);
        let u = UserId::new("u1");

        assert!(g.check(&TenantId::new("t1"), &u, &ConversationId::new()).allowed);
        // Same user id under another tenant has its own counter.
        assert!(g.check(&TenantId::new("t2"), &u, &ConversationId::new()).allowed);
    }

    #[test]
    fn denies_after_conversation_turn_cap() {
        let g = guard(100, 2, 0);
        let (t, u, c) = ids();

        assert!(g.check(&t, &u, &c).allowed);
        assert!(g.check(&t, &u, &c).allowed);
        let third = g.check(&t, &u, &c);
        assert!(!third.allowed);
        assert!(third.reason.unwrap().contains("turn cap"));
    }

    #[test]
    fn cooldown_denies_rapid_fire() {
        let g = guard(100, 100, 60);
        let (t, u, c) = ids();

        assert!(g.check(&t, &u, &c).allowed);
        let second = g.check(&t, &u, &c);
        assert!(!second.allowed);
        assert!(second.reason.unwrap().contains("wait"));
    }

    #[test]
    fn denied_checks_still_charge_the_counter() {
        let g = guard(100, 1, 0);
        let (t, u, c) = ids();

        assert!(g.check(&t, &u, &c).allowed);
        assert!(!g.check(&t, &u, &c).allowed);
        // The denied attempts were charged: even raising no further turns,
        // the counter kept moving (observable through continued denials).
        assert!(!g.check(&t, &u, &c).allowed);
    }

    #[test]
    fn concurrent_checks_never_exceed_quota() {
        use std::sync::Arc;

        let g = Arc::new(guard(50, 1000, 0));
        let t = TenantId::new("t1");
        let u = UserId::new("u1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = g.clone();
            let t = t.clone();
            let u = u.clone();
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0;
                for _ in 0..25 {
                    if g.check(&t, &u, &ConversationId::new()).allowed {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 200 attempts against a quota of 50: exactly 50 get through.
        assert_eq!(total, 50);
    }
}
