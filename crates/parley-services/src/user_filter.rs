use async_trait::async_trait;
use parley_bus::{Filter, FilterBehavior, FilterValue};
use parley_types::BusResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilterConfig {
    pub id: String,
    /// User ids or names that are always allowed.
    #[serde(default)]
    pub allow: Vec<String>,
    /// User ids or names that are always denied. Deny wins over allow.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Allows or denies values by the uid or name on their context.
pub struct UserFilter {
    config: UserFilterConfig,
}

impl UserFilter {
    pub fn new(config: UserFilterConfig) -> Self {
        Self { config }
    }

    fn listed(list: &[String], value: &FilterValue<'_>) -> bool {
        let context = value.context();
        list.iter()
            .any(|entry| entry == &context.uid || (!context.name.is_empty() && entry == &context.name))
    }
}

#[async_trait]
impl Filter for UserFilter {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn evaluate(&self, value: FilterValue<'_>) -> BusResult<FilterBehavior> {
        if Self::listed(&self.config.deny, &value) {
            tracing::debug!(filter = %self.config.id, uid = value.uid(), kind = value.kind(), "user denied");
            return Ok(FilterBehavior::Deny);
        }
        if Self::listed(&self.config.allow, &value) {
            return Ok(FilterBehavior::Allow);
        }
        Ok(FilterBehavior::Ignore)
    }
}

#[cfg(test)]
mod tests {
    use super::{UserFilter, UserFilterConfig};
    use parley_bus::{Filter, FilterBehavior, FilterValue};
    use parley_types::{Command, CommandVerb, Context, Message};

    fn filter() -> UserFilter {
        UserFilter::new(UserFilterConfig {
            id: "users".to_string(),
            allow: vec!["alice".to_string(), "mallory".to_string()],
            deny: vec!["u-666".to_string(), "mallory".to_string()],
        })
    }

    #[tokio::test]
    async fn unit_user_filter_matches_uid_or_name() {
        let filter = filter();
        let alice = Message::text(Context::new("u-1", "alice", "general"), "hi");
        let spammer = Command::new(
            "echo",
            CommandVerb::Create,
            Context::new("u-666", "sam", "general"),
        );
        let stranger = Message::text(Context::new("u-2", "bob", "general"), "hi");

        assert_eq!(
            filter.evaluate(FilterValue::Message(&alice)).await.expect("evaluate"),
            FilterBehavior::Allow
        );
        assert_eq!(
            filter.evaluate(FilterValue::Command(&spammer)).await.expect("evaluate"),
            FilterBehavior::Deny
        );
        assert_eq!(
            filter.evaluate(FilterValue::Message(&stranger)).await.expect("evaluate"),
            FilterBehavior::Ignore
        );
    }

    #[tokio::test]
    async fn regression_deny_wins_over_allow() {
        let mallory = Message::text(Context::new("u-3", "mallory", "general"), "hi");
        assert_eq!(
            filter()
                .evaluate(FilterValue::Message(&mallory))
                .await
                .expect("evaluate"),
            FilterBehavior::Deny
        );
    }
}
