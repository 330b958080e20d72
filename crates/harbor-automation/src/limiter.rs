use crate::AutomationError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use harbor_core::PlanTier;
use harbor_storage::Storage;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub const AI_COMPOSE_DAILY: &str = "ai_compose_daily";
pub const AI_SUMMARY_DAILY: &str = "ai_summary_daily";
pub const RULE_EXECUTIONS_MONTHLY: &str = "rule_executions_monthly";
pub const SMART_NOTIFICATIONS_MONTHLY: &str = "smart_notifications_monthly";

const UNLIMITED: i64 = -1;

/// Per-plan quotas. `-1` is unlimited and `0` disables the feature.
const QUOTAS: &[(PlanTier, &str, i64)] = &[
    (PlanTier::Free, AI_COMPOSE_DAILY, 5),
    (PlanTier::Free, AI_SUMMARY_DAILY, 10),
    (PlanTier::Free, RULE_EXECUTIONS_MONTHLY, 500),
    (PlanTier::Free, SMART_NOTIFICATIONS_MONTHLY, 0),
    (PlanTier::Pro, AI_COMPOSE_DAILY, 100),
    (PlanTier::Pro, AI_SUMMARY_DAILY, 200),
    (PlanTier::Pro, RULE_EXECUTIONS_MONTHLY, 10_000),
    (PlanTier::Pro, SMART_NOTIFICATIONS_MONTHLY, 1_000),
    (PlanTier::Business, AI_COMPOSE_DAILY, UNLIMITED),
    (PlanTier::Business, AI_SUMMARY_DAILY, UNLIMITED),
    (PlanTier::Business, RULE_EXECUTIONS_MONTHLY, UNLIMITED),
    (PlanTier::Business, SMART_NOTIFICATIONS_MONTHLY, UNLIMITED),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    Unlimited,
    Finite(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitDecision {
    pub allowed: bool,
    pub remaining: Remaining,
    pub limit: i64,
}

/// Features not in the table are disabled.
pub fn quota(plan: PlanTier, feature: &str) -> i64 {
    QUOTAS
        .iter()
        .find(|(tier, name, _)| *tier == plan && *name == feature)
        .map(|(_, _, limit)| *limit)
        .unwrap_or(0)
}

/// Half-open UTC window the feature is counted in: the calendar month for
/// `*_monthly` features, otherwise the calendar day.
pub fn usage_window(feature: &str, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();

    if feature.ends_with("_monthly") {
        let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
        let next = if today.month() == 12 {
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
        }
        .unwrap_or(first + Duration::days(31));
        return (start_of(first), start_of(next));
    }

    (start_of(today), start_of(today + Duration::days(1)))
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[derive(Clone)]
pub struct UsageLimiter {
    storage: Storage,
}

impl UsageLimiter {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Fails open: a counting error allows the action.
    pub async fn check_feature_limit(&self, user_id: Uuid, feature: &str, plan: PlanTier) -> LimitDecision {
        self.check_at(user_id, feature, plan, Utc::now()).await
    }

    pub async fn check_at(&self, user_id: Uuid, feature: &str, plan: PlanTier, now: DateTime<Utc>) -> LimitDecision {
        let limit = quota(plan, feature);
        if limit == UNLIMITED {
            return LimitDecision {
                allowed: true,
                remaining: Remaining::Unlimited,
                limit,
            };
        }
        if limit <= 0 {
            return LimitDecision {
                allowed: false,
                remaining: Remaining::Finite(0),
                limit: 0,
            };
        }

        let (since, until) = usage_window(feature, now);
        let limit_u = limit as u64;
        match self.storage.count_usage_events(user_id, feature, since, until).await {
            Ok(used) => LimitDecision {
                allowed: used < limit_u,
                remaining: Remaining::Finite(limit_u.saturating_sub(used)),
                limit,
            },
            Err(err) => {
                warn!(%user_id, feature, error = %err, "usage count failed; allowing");
                LimitDecision {
                    allowed: true,
                    remaining: Remaining::Finite(limit_u),
                    limit,
                }
            }
        }
    }

    /// Checks against the user's stored plan.
    pub async fn check_for_user(&self, user_id: Uuid, feature: &str) -> LimitDecision {
        let plan = match self.storage.get_user_plan(user_id).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(%user_id, error = %err, "plan lookup failed; assuming free tier");
                PlanTier::Free
            }
        };
        self.check_feature_limit(user_id, feature, plan).await
    }

    pub async fn track_feature_usage(&self, user_id: Uuid, feature: &str) -> Result<(), AutomationError> {
        self.storage.record_usage_event(user_id, feature, Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).expect("timestamp").with_timezone(&Utc)
    }

    #[test]
    fn windows_follow_feature_scope() {
        let now = at("2024-12-17T15:20:00Z");

        let (since, until) = usage_window(RULE_EXECUTIONS_MONTHLY, now);
        assert_eq!(since, at("2024-12-01T00:00:00Z"));
        assert_eq!(until, at("2025-01-01T00:00:00Z"));

        let (since, until) = usage_window(AI_COMPOSE_DAILY, now);
        assert_eq!(since, at("2024-12-17T00:00:00Z"));
        assert_eq!(until, at("2024-12-18T00:00:00Z"));
    }

    #[tokio::test]
    async fn disabled_and_unlimited_quotas() {
        let limiter = UsageLimiter::new(Storage::in_memory().await.expect("storage"));
        let user_id = Uuid::new_v4();

        let disabled = limiter
            .check_feature_limit(user_id, SMART_NOTIFICATIONS_MONTHLY, PlanTier::Free)
            .await;
        assert!(!disabled.allowed);

        let unlimited = limiter
            .check_feature_limit(user_id, AI_COMPOSE_DAILY, PlanTier::Business)
            .await;
        assert!(unlimited.allowed);
        assert_eq!(unlimited.remaining, Remaining::Unlimited);
        assert_eq!(unlimited.limit, -1);
    }

    #[tokio::test]
    async fn usage_counts_against_quota() {
        let limiter = UsageLimiter::new(Storage::in_memory().await.expect("storage"));
        let user_id = Uuid::new_v4();

        for _ in 0..4 {
            limiter.track_feature_usage(user_id, AI_COMPOSE_DAILY).await.expect("track");
        }
        let decision = limiter.check_feature_limit(user_id, AI_COMPOSE_DAILY, PlanTier::Free).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Remaining::Finite(1));

        limiter.track_feature_usage(user_id, AI_COMPOSE_DAILY).await.expect("track");
        let decision = limiter.check_feature_limit(user_id, AI_COMPOSE_DAILY, PlanTier::Free).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, Remaining::Finite(0));
    }

    #[tokio::test]
    async fn counting_failure_fails_open() {
        let storage = Storage::in_memory().await.expect("storage");
        sqlx::query("DROP TABLE usage_events")
            .execute(storage.pool())
            .await
            .expect("drop");
        let limiter = UsageLimiter::new(storage);

        let decision = limiter
            .check_feature_limit(Uuid::new_v4(), AI_SUMMARY_DAILY, PlanTier::Free)
            .await;
        assert!(decision.allowed);
    }
}
