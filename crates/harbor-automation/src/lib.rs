mod engine;
mod error;
mod limiter;
mod rules;

pub use engine::{AutomationEngine, AutomationEvent, RuleOutcome, DEFAULT_ERROR_THRESHOLD};
pub use error::AutomationError;
pub use limiter::{
    quota, usage_window, LimitDecision, Remaining, UsageLimiter, AI_COMPOSE_DAILY, AI_SUMMARY_DAILY,
    RULE_EXECUTIONS_MONTHLY, SMART_NOTIFICATIONS_MONTHLY,
};
pub use rules::{
    condition_matches, decode_actions, decode_conditions, first_match, rule_matches, Condition,
    DecodedCondition, FlagField, RuleAction, TextField, TextOperator,
};
