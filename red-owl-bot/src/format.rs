//! Small text helpers shared by the command modules.

use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, MessageId};

/// Discord rejects embeds with more fields than this.
pub const MAX_EMBED_FIELDS: usize = 25;
/// Discord rejects plain messages longer than this (in characters).
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Split a list of embed fields into groups that each fit in one embed.
pub fn chunk_fields<T: Clone>(fields: &[T]) -> Vec<Vec<T>> {
    fields
        .chunks(MAX_EMBED_FIELDS)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Split text into pieces of at most `max_chars` characters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Keep the first `max_chars` characters, appending `suffix` when cut.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{suffix}", &text[..byte_index]),
        None => text.to_owned(),
    }
}

/// Absolute and relative Discord timestamp markup.
pub fn discord_timestamp(at: DateTime<Utc>) -> String {
    let seconds = at.timestamp();
    format!("<t:{seconds}:F> (<t:{seconds}:R>)")
}

/// Extract the channel and message ids from a message link
/// (`https://discord.com/channels/<guild>/<channel>/<message>`).
pub fn parse_message_link(link: &str) -> Option<(ChannelId, MessageId)> {
    let mut segments = link.trim().trim_end_matches('/').rsplit('/');
    let message_id = segments.next()?.parse::<u64>().ok().filter(|id| *id != 0)?;
    let channel_id = segments.next()?.parse::<u64>().ok().filter(|id| *id != 0)?;

    Some((ChannelId::new(channel_id), MessageId::new(message_id)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fields_split_every_25() {
        let fields: Vec<u32> = (0..51).collect();
        let chunks = chunk_fields(&fields);

        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![25, 25, 1]
        );
    }

    #[test]
    fn split_message_counts_characters_not_bytes() {
        let text = "é".repeat(5);
        assert_eq!(split_message(&text, 2), vec!["éé", "éé", "é"]);
        assert!(split_message("", 2000).is_empty());
    }

    #[test]
    fn truncate_only_when_longer() {
        assert_eq!(truncate_chars("hello", 5, "..."), "hello");
        assert_eq!(truncate_chars("hello world", 5, "..."), "hello...");
    }

    #[test]
    fn message_links_use_last_two_segments() {
        assert_eq!(
            parse_message_link("https://discord.com/channels/1/22/333"),
            Some((ChannelId::new(22), MessageId::new(333)))
        );
        assert_eq!(parse_message_link("https://discord.com/channels/1/22/abc"), None);
        assert_eq!(parse_message_link("333"), None);
    }
}
