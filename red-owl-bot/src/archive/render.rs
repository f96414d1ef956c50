use std::sync::LazyLock;

use regex::Regex;
use serenity::all::{Attachment, ChannelId, GuildId, Message};

use crate::format::truncate_chars;

static CHANNEL_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:ptb\.|canary\.)?discord\.com/channels/(\d+)/(\d+)/?$")
        .expect("valid channel link regex")
});

const MAX_DESCRIPTION_CHARS: usize = 4000;
const TRUNCATED_SUFFIX: &str = "...\n(Message truncated)";

/// Parse a channel link into its guild and channel ids.
pub fn parse_channel_link(link: &str) -> Option<(GuildId, ChannelId)> {
    let captures = CHANNEL_LINK.captures(link.trim())?;
    let guild_id = captures[1].parse::<u64>().ok().filter(|id| *id != 0)?;
    let channel_id = captures[2].parse::<u64>().ok().filter(|id| *id != 0)?;

    Some((GuildId::new(guild_id), ChannelId::new(channel_id)))
}

/// The parts of an attachment that decide how it is copied.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u32,
    pub url: String,
}

impl AttachmentInfo {
    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|kind| kind.starts_with("image/"))
    }
}

impl From<&Attachment> for AttachmentInfo {
    fn from(attachment: &Attachment) -> Self {
        Self {
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            size: attachment.size,
            url: attachment.url.clone(),
        }
    }
}

/// How a source message is rebuilt in the destination channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyPlan {
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Link back to a message whose embeds are not reproduced
    pub original_link: Option<String>,
    pub reupload: Vec<AttachmentInfo>,
    /// Attachments that could not be carried over
    pub notes: Vec<String>,
}

impl CopyPlan {
    /// Whether the copy needs an embed at all.
    pub fn has_embed_content(&self) -> bool {
        self.description.is_some() || self.image_url.is_some() || self.original_link.is_some()
            || !self.notes.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_embed_content() && self.reupload.is_empty()
    }
}

/// Decide how to copy a message. Returns `None` for messages with nothing to
/// carry over.
pub fn plan_copy(
    content: &str,
    original_link: Option<String>,
    original_embed_image: Option<String>,
    attachments: &[AttachmentInfo],
    max_attachment_bytes: u32,
) -> Option<CopyPlan> {
    if content.is_empty() && attachments.is_empty() && original_link.is_none() {
        return None;
    }

    let mut plan = CopyPlan {
        description: (!content.is_empty())
            .then(|| truncate_chars(content, MAX_DESCRIPTION_CHARS, TRUNCATED_SUFFIX)),
        image_url: original_embed_image,
        original_link,
        ..CopyPlan::default()
    };

    // The first image attachment is shown inline unless an embed image already is
    let mut inline_image = None;
    if plan.image_url.is_none() {
        inline_image = attachments.iter().position(AttachmentInfo::is_image);
        plan.image_url = inline_image.map(|i| attachments[i].url.clone());
    }

    for (i, attachment) in attachments.iter().enumerate() {
        if Some(i) == inline_image {
            continue;
        }

        if attachment.size < max_attachment_bytes {
            plan.reupload.push(attachment.clone());
        } else {
            plan.notes
                .push(format!("- {} (file too large)", attachment.filename));
        }
    }

    Some(plan)
}

/// Build the plan for a fetched Discord message.
pub fn plan_message(message: &Message, max_attachment_bytes: u32) -> Option<CopyPlan> {
    let attachments: Vec<AttachmentInfo> = message.attachments.iter().map(Into::into).collect();
    let original_link = (!message.embeds.is_empty()).then(|| message.link());
    let embed_image = message
        .embeds
        .first()
        .and_then(|embed| embed.image.as_ref())
        .map(|image| image.url.clone());

    plan_copy(
        &message.content,
        original_link,
        embed_image,
        &attachments,
        max_attachment_bytes,
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const LIMIT: u32 = 8_000_000;

    fn attachment(name: &str, content_type: Option<&str>, size: u32) -> AttachmentInfo {
        AttachmentInfo {
            filename: name.to_owned(),
            content_type: content_type.map(str::to_owned),
            size,
            url: format!("https://cdn.example/{name}"),
        }
    }

    #[test]
    fn channel_links() {
        assert_eq!(
            parse_channel_link("https://discord.com/channels/123/456"),
            Some((GuildId::new(123), ChannelId::new(456)))
        );
        assert_eq!(
            parse_channel_link("https://canary.discord.com/channels/123/456/"),
            Some((GuildId::new(123), ChannelId::new(456)))
        );
        // Message links are not channel links
        assert_eq!(
            parse_channel_link("https://discord.com/channels/123/456/789"),
            None
        );
        assert_eq!(parse_channel_link("https://example.com/channels/1/2"), None);
    }

    #[test]
    fn empty_messages_are_skipped() {
        assert_eq!(plan_copy("", None, None, &[], LIMIT), None);
    }

    #[test]
    fn first_image_goes_inline_and_the_rest_is_reuploaded() {
        let attachments = vec![
            attachment("notes.txt", Some("text/plain"), 10),
            attachment("cat.png", Some("image/png"), 10),
            attachment("dog.png", Some("image/png"), 10),
            attachment("movie.mp4", Some("video/mp4"), LIMIT),
        ];

        let plan = plan_copy("hi", None, None, &attachments, LIMIT).unwrap();

        assert_eq!(plan.description.as_deref(), Some("hi"));
        assert_eq!(plan.image_url.as_deref(), Some("https://cdn.example/cat.png"));
        assert_eq!(
            plan.reupload
                .iter()
                .map(|a| a.filename.as_str())
                .collect::<Vec<_>>(),
            vec!["notes.txt", "dog.png"]
        );
        assert_eq!(plan.notes, vec!["- movie.mp4 (file too large)".to_owned()]);
    }

    #[test]
    fn embed_image_takes_precedence() {
        let attachments = vec![attachment("cat.png", Some("image/png"), 10)];

        let plan = plan_copy(
            "",
            Some("https://discord.com/channels/1/2/3".to_owned()),
            Some("https://embed.example/big.png".to_owned()),
            &attachments,
            LIMIT,
        )
        .unwrap();

        assert_eq!(plan.image_url.as_deref(), Some("https://embed.example/big.png"));
        assert_eq!(plan.reupload, attachments);
        assert!(plan.has_embed_content());
    }

    #[test]
    fn attachment_only_messages_need_no_embed() {
        let attachments = vec![attachment("song.mp3", Some("audio/mpeg"), 10)];
        let plan = plan_copy("", None, None, &attachments, LIMIT).unwrap();

        assert!(!plan.has_embed_content());
        assert!(!plan.is_empty());
    }

    #[test]
    fn long_content_is_truncated() {
        let content = "a".repeat(4100);
        let plan = plan_copy(&content, None, None, &[], LIMIT).unwrap();
        let description = plan.description.unwrap();

        assert!(description.ends_with(TRUNCATED_SUFFIX));
        assert_eq!(description.chars().count(), 4000 + TRUNCATED_SUFFIX.chars().count());
    }
}
