use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serenity::all::{CreateEmbed, CreateMessage, Http, Mentionable};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::book::{FiredReminder, ReminderStore};
use crate::config::ReminderConfig;
use crate::format::discord_timestamp;

const REMINDER_COLOUR: u32 = 0xE67E22;

/// Spawn the reminder scheduler task.
///
/// Reminders that came due while the bot was offline are handled on the first
/// tick like any other due reminder.
pub fn spawn_scheduler(
    http: Arc<Http>,
    store: ReminderStore,
    config: ReminderConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_scheduler(http, store, config).await;
    })
}

async fn run_scheduler(http: Arc<Http>, store: ReminderStore, config: ReminderConfig) {
    let tick = Duration::from_secs(config.tick_seconds.max(1));
    let grace = chrono::Duration::seconds(config.restore_grace_seconds);
    let mut interval = interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Reminder scheduler started (interval: {:?})", tick);

    loop {
        interval.tick().await;

        let now = Utc::now();
        if !store.read(|book| book.has_due(now)) {
            continue;
        }

        let fired = match store.update(|book| book.take_due(now, grace)) {
            Ok(fired) => fired,
            Err(e) => {
                error!("Failed to persist reminders: {e:?}");
                continue;
            }
        };

        debug!("{} reminder(s) came due", fired.len());

        for reminder in fired {
            if !reminder.deliver {
                info!(
                    "Skipping reminder {} (overdue since {})",
                    reminder.reminder.id, reminder.reminder.due_at
                );
                continue;
            }

            send_reminder(&http, &reminder).await;
        }
    }
}

async fn send_reminder(http: &Http, fired: &FiredReminder) {
    let reminder = &fired.reminder;

    let mut embed = CreateEmbed::new()
        .title("⏰ Reminder")
        .description(&reminder.message)
        .colour(REMINDER_COLOUR)
        .timestamp(serenity::all::Timestamp::now());

    if let Some(next) = fired.next_due_at {
        embed = embed.field("Next reminder", discord_timestamp(next), false);
    }

    let message = CreateMessage::new()
        .content(reminder.user_id.mention().to_string())
        .embed(embed);

    if let Err(e) = reminder.channel_id.send_message(http, message).await {
        error!("Failed to send reminder {}: {e:?}", reminder.id);
    }
}
