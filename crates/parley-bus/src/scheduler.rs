//! Scheduled triggers that inject commands and messages into the bus.

use std::str::FromStr;

use chrono::TimeZone;
use chrono_tz::Tz;
use cron::Schedule;
use parley_core::{current_unix_timestamp_ms, duration_until_ms};
use parley_types::{BusError, BusResult, Command, Context, Message};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::BusHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Enumerates supported `IntervalSchedule` values.
pub enum IntervalSchedule {
    Every { every_ms: u64 },
    Periodic { cron: String, timezone: String },
}

impl IntervalSchedule {
    /// Rejects zero periods, bad cron expressions, and unknown timezones.
    pub fn validate(&self) -> BusResult<()> {
        match self {
            Self::Every { every_ms } if *every_ms == 0 => {
                Err(BusError::validation("interval every_ms must be greater than 0"))
            }
            Self::Every { .. } => Ok(()),
            Self::Periodic { cron, timezone } => {
                next_periodic_due_unix_ms(cron, timezone, current_unix_timestamp_ms()).map(|_| ())
            }
        }
    }

    /// Next fire time strictly after `from_unix_ms`.
    pub fn next_due_unix_ms(&self, from_unix_ms: u64) -> BusResult<u64> {
        match self {
            Self::Every { every_ms } => Ok(from_unix_ms.saturating_add((*every_ms).max(1))),
            Self::Periodic { cron, timezone } => {
                next_periodic_due_unix_ms(cron, timezone, from_unix_ms)
            }
        }
    }
}

fn next_periodic_due_unix_ms(cron: &str, timezone: &str, from_unix_ms: u64) -> BusResult<u64> {
    let schedule = Schedule::from_str(cron)
        .map_err(|error| BusError::validation(format!("invalid cron expression '{cron}': {error}")))?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| BusError::validation(format!("invalid timezone '{timezone}'")))?;
    let from = tz
        .timestamp_millis_opt(i64::try_from(from_unix_ms).unwrap_or(i64::MAX))
        .single()
        .ok_or_else(|| BusError::validation("invalid from timestamp for periodic schedule"))?;
    let next = schedule.after(&from).next().ok_or_else(|| {
        BusError::validation(format!("cron expression '{cron}' has no future occurrence"))
    })?;
    Ok(u64::try_from(next.timestamp_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Publishes fixed commands and messages each time its schedule fires.
pub struct IntervalTrigger {
    pub id: String,
    pub schedule: IntervalSchedule,
    /// Context applied to emitted items that do not carry a user id.
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl IntervalTrigger {
    /// Publishes one round of commands and messages.
    pub fn fire(&self, bus: &BusHandle) -> BusResult<()> {
        tracing::debug!(
            interval = %self.id,
            commands = self.commands.len(),
            messages = self.messages.len(),
            "interval fired"
        );
        for command in &self.commands {
            let mut command = command.clone();
            if command.context.uid.is_empty() {
                command.context = self.context.clone();
            }
            bus.publish_command(command)?;
        }
        for message in &self.messages {
            let mut message = message.clone();
            if message.context.uid.is_empty() {
                message.context = self.context.clone();
            }
            bus.send(message)?;
        }
        Ok(())
    }

    /// Runs the trigger until the bus closes or the task is aborted.
    pub fn spawn(self, bus: BusHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now_ms = current_unix_timestamp_ms();
                let due_ms = match self.schedule.next_due_unix_ms(now_ms) {
                    Ok(due_ms) => due_ms,
                    Err(error) => {
                        tracing::error!(interval = %self.id, error = %error, "interval schedule failed");
                        return;
                    }
                };
                tokio::time::sleep(duration_until_ms(due_ms, now_ms)).await;

                match self.fire(&bus) {
                    Ok(()) => {}
                    Err(BusError::Closed) => {
                        tracing::debug!(interval = %self.id, "bus closed, stopping interval");
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(interval = %self.id, error = %error, "interval tick failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{IntervalSchedule, IntervalTrigger};
    use crate::BusHandle;
    use parley_store::InMemoryBusStore;
    use parley_types::{BusError, Command, CommandVerb, Context, Message};
    use std::sync::Arc;
    use std::time::Duration;

    fn trigger(schedule: IntervalSchedule) -> IntervalTrigger {
        IntervalTrigger {
            id: "tick".to_string(),
            schedule,
            context: Context::new("scheduler", "scheduler", "ops"),
            commands: vec![Command::new("echo", CommandVerb::Create, Context::default())
                .with_data("body", ["tick"])],
            messages: vec![Message::text(Context::default(), "heartbeat")],
        }
    }

    #[test]
    fn unit_every_schedule_adds_period() {
        let schedule = IntervalSchedule::Every { every_ms: 250 };
        assert_eq!(schedule.next_due_unix_ms(1_000).expect("due"), 1_250);
        assert!(IntervalSchedule::Every { every_ms: 0 }.validate().is_err());
    }

    #[test]
    fn unit_periodic_schedule_uses_cron_and_timezone() {
        let schedule = IntervalSchedule::Periodic {
            cron: "0 0 * * * * *".to_string(),
            timezone: "UTC".to_string(),
        };
        schedule.validate().expect("valid schedule");
        let due = schedule.next_due_unix_ms(1_700_000_000_000).expect("due");
        assert!(due > 1_700_000_000_000);
        assert_eq!(due % 3_600_000, 0);
    }

    #[test]
    fn regression_invalid_cron_or_timezone_is_rejected() {
        let bad_cron = IntervalSchedule::Periodic {
            cron: "not a cron".to_string(),
            timezone: "UTC".to_string(),
        };
        assert!(matches!(bad_cron.validate(), Err(BusError::Validation(_))));
        let bad_tz = IntervalSchedule::Periodic {
            cron: "0 * * * * * *".to_string(),
            timezone: "Mars/Olympus".to_string(),
        };
        assert!(matches!(bad_tz.validate(), Err(BusError::Validation(_))));
    }

    #[test]
    fn unit_schedule_deserializes_tagged_form() {
        let schedule: IntervalSchedule =
            serde_json::from_str(r#"{"type":"every","every_ms":1000}"#).expect("decode");
        assert_eq!(schedule, IntervalSchedule::Every { every_ms: 1_000 });
    }

    #[tokio::test]
    async fn functional_fire_applies_trigger_context() {
        let (bus, mut receivers) = BusHandle::detached(Arc::new(InMemoryBusStore::new()));
        trigger(IntervalSchedule::Every { every_ms: 1_000 })
            .fire(&bus)
            .expect("fire");
        let command = receivers.commands.try_recv().expect("command published");
        assert_eq!(command.context.uid, "scheduler");
        assert_eq!(command.get_head("body"), Ok("tick"));
        let message = receivers.outgoing.try_recv().expect("message sent");
        assert_eq!(message.body, "heartbeat");
        assert_eq!(message.context.channel, "ops");
    }

    #[tokio::test]
    async fn functional_spawned_trigger_fires_repeatedly() {
        let (bus, mut receivers) = BusHandle::detached(Arc::new(InMemoryBusStore::new()));
        let task = trigger(IntervalSchedule::Every { every_ms: 10 }).spawn(bus);
        for _ in 0..2 {
            let command = tokio::time::timeout(Duration::from_secs(2), receivers.commands.recv())
                .await
                .expect("tick before timeout")
                .expect("command");
            assert_eq!(command.noun, "echo");
        }
        task.abort();
    }
}
