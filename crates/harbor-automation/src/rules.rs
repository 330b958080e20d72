//! Typed view of the JSON condition and action blobs stored on a rule.
//!
//! Blobs are decoded one element at a time so a single unrecognized entry
//! never poisons the rest of the rule.

use harbor_core::{EmailRule, FolderType, MatchMode, NormalizedMessage, Participant};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    From,
    To,
    Subject,
    Body,
    Importance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagField {
    HasAttachments,
    Unread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Flag {
        field: FlagField,
        value: bool,
    },
    Text {
        field: TextField,
        operator: TextOperator,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    MoveToFolder {
        #[serde(default)]
        folder_type: Option<FolderType>,
    },
    AddLabel {
        label: String,
    },
    RemoveLabel {
        label: String,
    },
    MarkRead,
    MarkUnread,
    MarkStarred,
    Archive,
    Delete,
    AddCategory {
        category: String,
    },
    Notify {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// A condition entry as read from storage; `Unrecognized` always evaluates
/// to false.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedCondition {
    Known(Condition),
    Unrecognized(Value),
}

pub fn decode_conditions(raw: &Value) -> Vec<DecodedCondition> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .map(|item| match serde_json::from_value::<Condition>(item.clone()) {
            Ok(condition) => DecodedCondition::Known(condition),
            Err(_) => DecodedCondition::Unrecognized(item.clone()),
        })
        .collect()
}

/// Unknown or malformed actions are logged and dropped.
pub fn decode_actions(rule: &EmailRule) -> Vec<RuleAction> {
    let Some(items) = rule.actions.as_array() else {
        warn!(rule_id = %rule.id, "rule actions are not a list; nothing to run");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<RuleAction>(item.clone()) {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(rule_id = %rule.id, action = %item, error = %err, "skipping unknown rule action");
                None
            }
        })
        .collect()
}

/// Whether the rule's conditions hold for the message. A rule without any
/// conditions never matches.
pub fn rule_matches(rule: &EmailRule, message: &NormalizedMessage) -> bool {
    let conditions = decode_conditions(&rule.conditions);
    if conditions.is_empty() {
        debug!(rule_id = %rule.id, "rule has no conditions");
        return false;
    }

    let mut results = conditions.iter().map(|condition| match condition {
        DecodedCondition::Known(condition) => condition_matches(condition, message),
        DecodedCondition::Unrecognized(raw) => {
            debug!(rule_id = %rule.id, condition = %raw, "unrecognized condition treated as non-match");
            false
        }
    });

    match rule.match_mode {
        MatchMode::All => results.all(|hit| hit),
        MatchMode::Any => results.any(|hit| hit),
    }
}

pub fn condition_matches(condition: &Condition, message: &NormalizedMessage) -> bool {
    match condition {
        Condition::Flag { field, value } => {
            let actual = match field {
                FlagField::HasAttachments => message.flags.has_attachments,
                FlagField::Unread => message.flags.unread,
            };
            actual == *value
        }
        Condition::Text {
            field,
            operator,
            value,
        } => text_values(*field, message)
            .iter()
            .any(|candidate| text_matches(*operator, candidate, value)),
    }
}

/// Every string a text condition may test; address fields expose both the
/// bare address and the display name.
fn text_values(field: TextField, message: &NormalizedMessage) -> Vec<String> {
    fn participants(list: &[Participant]) -> Vec<String> {
        let mut values = Vec::with_capacity(list.len() * 2);
        for participant in list {
            values.push(participant.email.clone());
            if let Some(name) = &participant.name {
                values.push(name.clone());
                values.push(format!("{name} <{}>", participant.email));
            }
        }
        values
    }

    match field {
        TextField::From => participants(&message.from),
        TextField::To => {
            let mut values = participants(&message.to);
            values.extend(participants(&message.cc));
            values
        }
        TextField::Subject => vec![message.subject.clone()],
        TextField::Body => message
            .body_text
            .iter()
            .chain(message.body_html.iter())
            .cloned()
            .collect(),
        TextField::Importance => vec![message.importance.as_str().to_string()],
    }
}

fn text_matches(operator: TextOperator, candidate: &str, pattern: &str) -> bool {
    if operator == TextOperator::Regex {
        return match RegexBuilder::new(pattern).size_limit(1 << 20).build() {
            Ok(regex) => regex.is_match(candidate),
            Err(err) => {
                debug!(pattern, error = %err, "invalid rule regex treated as non-match");
                false
            }
        };
    }

    let candidate = candidate.to_lowercase();
    let pattern = pattern.to_lowercase();
    match operator {
        TextOperator::Equals => candidate == pattern,
        TextOperator::Contains => candidate.contains(&pattern),
        TextOperator::StartsWith => candidate.starts_with(&pattern),
        TextOperator::EndsWith => candidate.ends_with(&pattern),
        TextOperator::Regex => false,
    }
}

/// First rule in ascending priority order whose conditions match.
pub fn first_match<'a>(rules: &'a [EmailRule], message: &NormalizedMessage) -> Option<&'a EmailRule> {
    let mut ordered: Vec<&EmailRule> = rules.iter().filter(|rule| rule.is_active).collect();
    ordered.sort_by_key(|rule| rule.priority);
    ordered.into_iter().find(|rule| rule_matches(rule, message))
}
