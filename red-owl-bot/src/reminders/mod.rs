mod book;
mod scheduler;

use anyhow::Result;
use chrono::Utc;
use indoc::indoc;
use poise::CreateReply;
use serenity::all::{CreateEmbed, CreateEmbedFooter};

pub use book::ReminderStore;
pub use scheduler::spawn_scheduler;

use self::book::{CancelError, Reminder, format_duration, parse_duration};
use crate::command::Context;
use crate::format::{discord_timestamp, truncate_chars};

const MIN_DELAY_SECONDS: u64 = 10;
const MAX_DELAY_SECONDS: u64 = 31_536_000;
const MIN_INTERVAL_SECONDS: u64 = 60;
const MAX_INTERVAL_SECONDS: u64 = 2_592_000;
const MAX_MESSAGE_CHARS: usize = 1000;
const LIST_LIMIT: usize = 10;
const CREATED_COLOUR: u32 = 0x2ECC71;
const RECURRING_COLOUR: u32 = 0x3498DB;

async fn create_reminder(
    ctx: Context<'_>,
    seconds: u64,
    message: String,
    recurring: bool,
) -> Result<()> {
    let reminder = Reminder::new(
        ctx.author().id,
        ctx.channel_id(),
        ctx.guild_id(),
        truncate_chars(&message, MAX_MESSAGE_CHARS, ""),
        seconds,
        recurring,
        Utc::now(),
    );

    let (title, colour, when_label, delay_label) = if recurring {
        ("🔄 Recurring reminder created", RECURRING_COLOUR, "First reminder", "Interval")
    } else {
        ("✅ Reminder created", CREATED_COLOUR, "When", "In")
    };

    let embed = CreateEmbed::new()
        .title(title)
        .description(&reminder.message)
        .colour(colour)
        .field(when_label, discord_timestamp(reminder.due_at), false)
        .field(delay_label, format_duration(seconds), false)
        .footer(CreateEmbedFooter::new(format!("ID: {}", reminder.id)));

    ctx.data().reminders.update(|book| book.add(reminder))?;

    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Create a reminder (e.g. 10m, 2h30m, 1d3h)
#[poise::command(prefix_command, slash_command, aliases("reminder", "remindme"))]
pub async fn remind(
    ctx: Context<'_>,
    #[description = "When to remind you (e.g. 10m, 2h30m, 1d3h)"] duration: String,
    #[description = "What to remind you about"]
    #[rest]
    message: Option<String>,
) -> Result<()> {
    let seconds = match parse_duration(&duration) {
        Some(seconds) if seconds >= MIN_DELAY_SECONDS => seconds,
        _ => {
            ctx.say(indoc! {"
                ❌ **Invalid duration.** Use a format like `10m`, `2h30m`, `1d3h`.
                Units: s (seconds), m (minutes), h (hours), d (days), w (weeks)
                Minimum duration: 10 seconds"})
                .await?;
            return Ok(());
        }
    };

    if seconds > MAX_DELAY_SECONDS {
        ctx.say("❌ **Duration too long.** Maximum: 1 year").await?;
        return Ok(());
    }

    let message = message.unwrap_or_else(|| "Your reminder!".to_owned());
    create_reminder(ctx, seconds, message, false).await
}

/// Create a recurring reminder (e.g. 1h, 1d)
#[poise::command(prefix_command, slash_command)]
pub async fn remind_repeat(
    ctx: Context<'_>,
    #[description = "How often to remind you (e.g. 1h, 1d)"] interval: String,
    #[description = "What to remind you about"]
    #[rest]
    message: Option<String>,
) -> Result<()> {
    let seconds = match parse_duration(&interval) {
        Some(seconds) if seconds >= MIN_INTERVAL_SECONDS => seconds,
        _ => {
            ctx.say("❌ **Invalid interval.** Minimum: 1 minute (1m)")
                .await?;
            return Ok(());
        }
    };

    if seconds > MAX_INTERVAL_SECONDS {
        ctx.say("❌ **Interval too long.** Maximum: 30 days").await?;
        return Ok(());
    }

    let message = message.unwrap_or_else(|| "Recurring reminder".to_owned());
    create_reminder(ctx, seconds, message, true).await
}

/// List your active reminders
#[poise::command(prefix_command, slash_command, aliases("reminders", "reminderlist"))]
pub async fn remind_list(ctx: Context<'_>) -> Result<()> {
    let reminders = ctx
        .data()
        .reminders
        .read(|book| book.sorted_for(ctx.author().id));

    if reminders.is_empty() {
        ctx.say("📭 You have no active reminders.").await?;
        return Ok(());
    }

    let mut embed = CreateEmbed::new()
        .title(format!("📋 Your reminders ({})", reminders.len()))
        .colour(RECURRING_COLOUR);

    for (i, reminder) in reminders.iter().take(LIST_LIMIT).enumerate() {
        let icon = if reminder.interval_seconds.is_some() {
            "🔄"
        } else {
            "⏰"
        };

        let mut when = discord_timestamp(reminder.due_at);
        if let Some(interval) = reminder.interval_seconds {
            when.push_str(&format!("\n*Repeats every {}*", format_duration(interval)));
        }

        embed = embed.field(
            format!(
                "{icon} {}. {}",
                i + 1,
                truncate_chars(&reminder.message, 50, "...")
            ),
            when,
            false,
        );
    }

    if reminders.len() > LIST_LIMIT {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "... and {} more. Use remind_clear to clean up.",
            reminders.len() - LIST_LIMIT
        )));
    }

    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Cancel one reminder by its number in remind_list
#[poise::command(prefix_command, slash_command, aliases("remindercancel", "delreminder"))]
pub async fn remind_cancel(
    ctx: Context<'_>,
    #[description = "Number shown by remind_list"] reminder_index: i64,
) -> Result<()> {
    let cancelled = ctx
        .data()
        .reminders
        .update(|book| book.cancel(ctx.author().id, reminder_index))?;

    match cancelled {
        Ok(reminder) => {
            ctx.say(format!(
                "✅ Reminder **{reminder_index}** cancelled: *{}*",
                truncate_chars(&reminder.message, 100, "")
            ))
            .await?;
        }
        Err(CancelError::NoReminders) => {
            ctx.say("❌ You have no active reminders.").await?;
        }
        Err(CancelError::OutOfRange { count }) => {
            ctx.say(format!("❌ Invalid number. Use a number between 1 and {count}."))
                .await?;
        }
    }

    Ok(())
}

/// Delete all your reminders
#[poise::command(prefix_command, slash_command, aliases("reminderclear", "clearreminders"))]
pub async fn remind_clear(ctx: Context<'_>) -> Result<()> {
    let count = ctx
        .data()
        .reminders
        .update(|book| book.clear(ctx.author().id))?;

    if count == 0 {
        ctx.say("❌ You have no reminders to delete.").await?;
    } else {
        ctx.say(format!("✅ **{count}** reminder(s) deleted.")).await?;
    }

    Ok(())
}
