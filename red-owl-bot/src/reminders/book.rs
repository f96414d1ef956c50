use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId, UserId};

use crate::store::PersistedState;

static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([smhdwSMHDW])").expect("valid duration regex"));

const UNITS: [(&str, u64); 5] = [
    ("week", 604_800),
    ("day", 86_400),
    ("hour", 3_600),
    ("minute", 60),
    ("second", 1),
];

/// Parse a flexible duration such as `10m`, `2h30m` or `1d3h15m` into seconds.
/// Returns `None` when nothing matches or the total is zero.
pub fn parse_duration(input: &str) -> Option<u64> {
    let mut total: u64 = 0;

    for part in DURATION_PART.captures_iter(input) {
        let amount: u64 = part[1].parse().ok()?;
        let unit = match part[2].to_ascii_lowercase().as_str() {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            _ => return None,
        };
        total = total.checked_add(amount.checked_mul(unit)?)?;
    }

    (total > 0).then_some(total)
}

/// Human readable duration, e.g. `1 day, 2 hours, 1 minute`.
pub fn format_duration(mut seconds: u64) -> String {
    let mut parts = Vec::new();

    for (name, length) in UNITS {
        if seconds >= length {
            let count = seconds / length;
            seconds %= length;
            let plural = if count > 1 { "s" } else { "" };
            parts.push(format!("{count} {name}{plural}"));
        }
    }

    if parts.is_empty() {
        "0 seconds".to_owned()
    } else {
        parts.join(", ")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub message: String,
    pub due_at: DateTime<Utc>,
    /// Seconds between occurrences for recurring reminders
    pub interval_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(
        user_id: UserId,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
        message: String,
        delay_seconds: u64,
        recurring: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{user_id}_{}", now.timestamp_millis()),
            user_id,
            channel_id,
            guild_id,
            message,
            due_at: now + Duration::seconds(delay_seconds as i64),
            interval_seconds: recurring.then_some(delay_seconds),
            created_at: now,
        }
    }
}

/// A reminder that came due during a scheduler tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredReminder {
    pub reminder: Reminder,
    /// False when the reminder was overdue for too long to still be useful
    pub deliver: bool,
    /// Next occurrence for recurring reminders
    pub next_due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq)]
pub enum CancelError {
    NoReminders,
    OutOfRange { count: usize },
}

/// All reminders, grouped by the member who created them.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ReminderBook {
    #[serde(default)]
    users: HashMap<UserId, Vec<Reminder>>,
}

impl ReminderBook {
    pub fn add(&mut self, reminder: Reminder) {
        self.users.entry(reminder.user_id).or_default().push(reminder);
    }

    /// A member's reminders, soonest first.
    pub fn sorted_for(&self, user_id: UserId) -> Vec<Reminder> {
        let mut reminders = self.users.get(&user_id).cloned().unwrap_or_default();
        reminders.sort_by_key(|r| r.due_at);
        reminders
    }

    /// Cancel by 1-based position in [`Self::sorted_for`].
    pub fn cancel(&mut self, user_id: UserId, index: i64) -> Result<Reminder, CancelError> {
        let sorted = self.sorted_for(user_id);
        if sorted.is_empty() {
            return Err(CancelError::NoReminders);
        }
        if index < 1 || index as usize > sorted.len() {
            return Err(CancelError::OutOfRange {
                count: sorted.len(),
            });
        }

        let target = sorted[index as usize - 1].clone();
        if let Some(reminders) = self.users.get_mut(&user_id) {
            reminders.retain(|r| r.id != target.id);
            if reminders.is_empty() {
                self.users.remove(&user_id);
            }
        }

        Ok(target)
    }

    /// Remove every reminder of a member, returning how many there were.
    pub fn clear(&mut self, user_id: UserId) -> usize {
        self.users.remove(&user_id).map_or(0, |r| r.len())
    }

    pub fn has_due(&self, now: DateTime<Utc>) -> bool {
        self.users.values().flatten().any(|r| r.due_at <= now)
    }

    /// Pop every due reminder. Recurring ones are pushed to `now + interval`,
    /// one-shot ones are removed. Anything overdue by more than `grace` is
    /// reported as not to be delivered.
    pub fn take_due(&mut self, now: DateTime<Utc>, grace: Duration) -> Vec<FiredReminder> {
        let mut fired = Vec::new();

        for reminders in self.users.values_mut() {
            reminders.retain_mut(|reminder| {
                if reminder.due_at > now {
                    return true;
                }

                let deliver = now - reminder.due_at < grace;
                let next_due_at = reminder
                    .interval_seconds
                    .map(|interval| now + Duration::seconds(interval as i64));

                fired.push(FiredReminder {
                    reminder: reminder.clone(),
                    deliver,
                    next_due_at,
                });

                match next_due_at {
                    Some(next) => {
                        reminder.due_at = next;
                        true
                    }
                    None => false,
                }
            });
        }

        self.users.retain(|_, reminders| !reminders.is_empty());
        fired.sort_by_key(|f| f.reminder.due_at);
        fired
    }
}

pub type ReminderStore = PersistedState<ReminderBook>;

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    const USER: UserId = UserId::new(10);
    const CHANNEL: ChannelId = ChannelId::new(20);

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn reminder(message: &str, delay: u64, recurring: bool, now: DateTime<Utc>) -> Reminder {
        Reminder::new(USER, CHANNEL, None, message.to_owned(), delay, recurring, now)
    }

    #[test]
    fn durations_sum_their_parts() {
        assert_eq!(parse_duration("10m"), Some(600));
        assert_eq!(parse_duration("2h30m"), Some(9_000));
        assert_eq!(parse_duration("1D3h15M"), Some(98_100));
        assert_eq!(parse_duration("1w"), Some(604_800));
        assert_eq!(parse_duration("0m"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("99999999999999999999w"), None);
    }

    #[test]
    fn durations_format_largest_units_first() {
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(61), "1 minute, 1 second");
        assert_eq!(format_duration(694_800), "1 week, 1 day, 1 hour");
        assert_eq!(format_duration(7_200), "2 hours");
    }

    #[test]
    fn reminder_ids_embed_user_and_millis() {
        let r = reminder("tea", 60, false, at(0));
        assert_eq!(r.id, "10_1700000000000");
        assert_eq!(r.due_at, at(60));
        assert_eq!(r.interval_seconds, None);
        assert_eq!(reminder("tea", 60, true, at(0)).interval_seconds, Some(60));
    }

    #[test]
    fn cancel_uses_sorted_positions() {
        let mut book = ReminderBook::default();
        book.add(reminder("later", 600, false, at(0)));
        book.add(reminder("sooner", 60, false, at(1)));

        assert_eq!(
            book.cancel(USER, 3),
            Err(CancelError::OutOfRange { count: 2 })
        );
        assert_eq!(book.cancel(USER, 1).unwrap().message, "sooner");
        assert_eq!(book.sorted_for(USER).len(), 1);
        assert_eq!(book.cancel(USER, 1).unwrap().message, "later");
        assert_eq!(book.cancel(USER, 1), Err(CancelError::NoReminders));
    }

    #[test]
    fn due_one_shots_are_removed_and_recurring_rescheduled() {
        let mut book = ReminderBook::default();
        book.add(reminder("once", 60, false, at(0)));
        book.add(reminder("hourly", 3_600, true, at(1)));
        book.add(reminder("future", 86_400, false, at(2)));

        let grace = Duration::seconds(300);
        assert!(!book.has_due(at(30)));
        assert!(book.take_due(at(30), grace).is_empty());

        let fired = book.take_due(at(3_601), grace);
        assert_eq!(
            fired.iter().map(|f| f.reminder.message.as_str()).collect::<Vec<_>>(),
            vec!["once", "hourly"]
        );
        assert!(fired.iter().all(|f| f.deliver == (f.reminder.message == "hourly")));
        assert_eq!(fired[1].next_due_at, Some(at(7_201)));

        let remaining: Vec<_> = book
            .sorted_for(USER)
            .into_iter()
            .map(|r| (r.message, r.due_at))
            .collect();
        assert_eq!(
            remaining,
            vec![("hourly".to_owned(), at(7_201)), ("future".to_owned(), at(86_402))]
        );
    }

    #[test]
    fn clear_reports_count() {
        let mut book = ReminderBook::default();
        book.add(reminder("a", 60, false, at(0)));
        book.add(reminder("b", 60, true, at(1)));

        assert_eq!(book.clear(USER), 2);
        assert_eq!(book.clear(USER), 0);
    }
}
