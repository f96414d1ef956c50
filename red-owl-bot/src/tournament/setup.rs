//! The DM wizard collecting a tournament's settings.

use std::sync::LazyLock;

use regex::Regex;
use serenity::all::{ChannelId, CreateEmbed, CreateEmbedFooter, GuildId, UserId};

use super::bracket::{TournamentSettings, VotingBackend};

static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([mhd])$").expect("valid duration regex"));

pub const MIN_PARTICIPANTS: usize = 4;
/// Longest vote or pause the wizard accepts.
pub const MAX_DURATION_SECONDS: u64 = 30 * 86_400;
const PREVIEW_LIMIT: usize = 10;
const CHANNEL_LIST_CHARS: usize = 1900;
const PARTICIPANT_LIST_CHARS: usize = 1000;

const SETUP_COLOUR: u32 = 0x3498DB;
const DONE_COLOUR: u32 = 0x2ECC71;
const ERROR_COLOUR: u32 = 0xE74C3C;

/// Parse `30m`, `2h` or `1d` into seconds, up to 30 days.
pub fn parse_duration(input: &str) -> Option<u64> {
    let input = input.trim().to_lowercase();
    let captures = DURATION.captures(&input)?;
    let value: u64 = captures[1].parse().ok()?;
    let unit = match &captures[2] {
        "m" => 60,
        "h" => 3_600,
        _ => 86_400,
    };

    value
        .checked_mul(unit)
        .filter(|seconds| (1..=MAX_DURATION_SECONDS).contains(seconds))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 3_600 {
        format!("{} minutes", seconds / 60)
    } else if seconds < 86_400 {
        format!("{} hours", seconds / 3_600)
    } else {
        format!("{} days", seconds / 86_400)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Theme,
    Participants,
    Channel,
    VoteDuration,
    BetweenRounds,
    Backend,
    Confirm,
}

/// A text channel the tournament can be played in.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelChoice {
    pub id: ChannelId,
    pub name: String,
}

/// What happened after a DM, used to pick the answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SetupEvent {
    Cancelled,
    ThemeSet,
    EmptyName,
    ParticipantAdded { name: String, image: Option<String> },
    NeedMoreParticipants,
    ChannelPrompt { channels: Vec<String> },
    ChannelNotFound,
    ChannelSet,
    InvalidDuration { examples: &'static str },
    VoteDurationSet,
    BackendPrompt,
    InvalidBackend,
    Summary,
    ConfirmOrCancel,
    Confirmed(TournamentSettings),
}

#[derive(Debug, Clone)]
pub struct SetupSession {
    pub guild_id: GuildId,
    pub creator_id: UserId,
    pub step: Step,
    pub theme: String,
    pub participants: Vec<(String, Option<String>)>,
    pub channel: Option<ChannelChoice>,
    pub vote_duration: u64,
    pub between_rounds: u64,
    pub backend: VotingBackend,
    forms_available: bool,
}

impl SetupSession {
    pub fn new(guild_id: GuildId, creator_id: UserId, forms_available: bool) -> Self {
        Self {
            guild_id,
            creator_id,
            step: Step::Theme,
            theme: String::new(),
            participants: Vec::new(),
            channel: None,
            vote_duration: 3_600,
            between_rounds: 300,
            backend: VotingBackend::Reactions,
            forms_available,
        }
    }

    /// Feed one DM into the wizard. `image` is the first image attached to
    /// it, `channels` the guild's text channels in display order.
    pub fn handle(&mut self, content: &str, image: Option<String>, channels: &[ChannelChoice]) -> SetupEvent {
        let content = content.trim();
        let keyword = content.to_lowercase();

        if keyword == "cancel" {
            return SetupEvent::Cancelled;
        }

        match self.step {
            Step::Theme => {
                if content.is_empty() {
                    return SetupEvent::EmptyName;
                }
                self.theme = content.to_owned();
                self.step = Step::Participants;
                SetupEvent::ThemeSet
            }
            Step::Participants if keyword == "done" => {
                if self.participants.len() < MIN_PARTICIPANTS {
                    return SetupEvent::NeedMoreParticipants;
                }
                self.step = Step::Channel;
                SetupEvent::ChannelPrompt {
                    channels: channels.iter().map(|c| c.name.clone()).collect(),
                }
            }
            Step::Participants => {
                if content.is_empty() {
                    return SetupEvent::EmptyName;
                }
                self.participants.push((content.to_owned(), image.clone()));
                SetupEvent::ParticipantAdded {
                    name: content.to_owned(),
                    image,
                }
            }
            Step::Channel => {
                let found = match content.parse::<usize>() {
                    Ok(number) => number.checked_sub(1).and_then(|i| channels.get(i)),
                    Err(_) => channels.iter().find(|c| c.name == content),
                };
                let Some(channel) = found else {
                    return SetupEvent::ChannelNotFound;
                };

                self.channel = Some(channel.clone());
                self.step = Step::VoteDuration;
                SetupEvent::ChannelSet
            }
            Step::VoteDuration => {
                let Some(seconds) = parse_duration(content) else {
                    return SetupEvent::InvalidDuration {
                        examples: "30m, 2h, 1d",
                    };
                };
                self.vote_duration = seconds;
                self.step = Step::BetweenRounds;
                SetupEvent::VoteDurationSet
            }
            Step::BetweenRounds => {
                let Some(seconds) = parse_duration(content) else {
                    return SetupEvent::InvalidDuration {
                        examples: "5m, 30m, 1h",
                    };
                };
                self.between_rounds = seconds;
                self.step = Step::Backend;
                SetupEvent::BackendPrompt
            }
            Step::Backend => {
                self.backend = match keyword.as_str() {
                    "reactions" => VotingBackend::Reactions,
                    "forms" if self.forms_available => VotingBackend::Forms,
                    _ => return SetupEvent::InvalidBackend,
                };
                self.step = Step::Confirm;
                SetupEvent::Summary
            }
            Step::Confirm if keyword == "confirm" => match &self.channel {
                Some(channel) => SetupEvent::Confirmed(TournamentSettings {
                    theme: self.theme.clone(),
                    participants: self.participants.clone(),
                    channel_id: channel.id,
                    vote_duration: self.vote_duration,
                    between_rounds: self.between_rounds,
                    backend: self.backend,
                    creator_id: self.creator_id,
                }),
                None => {
                    self.step = Step::Channel;
                    SetupEvent::ChannelNotFound
                }
            },
            Step::Confirm => SetupEvent::ConfirmOrCancel,
        }
    }

    fn participant_list(&self) -> String {
        let list = self
            .participants
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("{}. {name}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        // Keep the most recent entries when the list gets long
        let skip = list.chars().count().saturating_sub(PARTICIPANT_LIST_CHARS);
        list.chars().skip(skip).collect()
    }

    fn channel_name(&self) -> &str {
        self.channel.as_ref().map_or("?", |c| c.name.as_str())
    }

    fn summary_embed(&self) -> CreateEmbed {
        let backend = match self.backend {
            VotingBackend::Reactions => "Discord reactions",
            VotingBackend::Forms => "Google Forms",
        };

        let mut preview = self
            .participants
            .iter()
            .take(PREVIEW_LIMIT)
            .map(|(name, _)| format!("• {name}"))
            .collect::<Vec<_>>()
            .join("\n");
        if self.participants.len() > PREVIEW_LIMIT {
            preview.push_str(&format!(
                "\n... and {} more",
                self.participants.len() - PREVIEW_LIMIT
            ));
        }

        CreateEmbed::new()
            .title("🏆 Tournament summary")
            .description(format!(
                "**Theme:** {}\n**Participants:** {}\n**Channel:** #{}\n**Vote duration:** {}\n**Delay between rounds:** {}\n**Voting:** {backend}",
                self.theme,
                self.participants.len(),
                self.channel_name(),
                format_duration(self.vote_duration),
                format_duration(self.between_rounds),
            ))
            .colour(DONE_COLOUR)
            .field("Participants preview", preview, false)
            .footer(CreateEmbedFooter::new(
                "Type 'confirm' to start the tournament or 'cancel' to give up",
            ))
    }

    /// The first wizard message.
    pub fn welcome_embed() -> CreateEmbed {
        CreateEmbed::new()
            .title("🏆 Tournament setup")
            .description(
                "Welcome to the tournament wizard!\n\n**Step 1/6: Theme**\n\nWhat is the theme of your tournament? (e.g. Movie villains, Best desserts...)",
            )
            .colour(SETUP_COLOUR)
            .footer(CreateEmbedFooter::new("Type 'cancel' at any time to give up"))
    }

    /// The answer to send back for an event. `None` when the event only
    /// needs a plain text answer, see [`Self::text`].
    pub fn embed(&self, event: &SetupEvent) -> Option<CreateEmbed> {
        let setup = |description: String| {
            CreateEmbed::new()
                .title("🏆 Tournament setup")
                .description(description)
                .colour(SETUP_COLOUR)
        };

        let embed = match event {
            SetupEvent::ThemeSet => setup(format!(
                "**Theme:** {}\n\n**Step 2/6: Participants**\n\nNow send me the participants one by one.\n\n• Just write the participant's name\n• You can attach an image to the message (optional)\n\nType `done` once every participant is added (minimum {MIN_PARTICIPANTS}).",
                self.theme
            ))
            .field("Participants added", "None yet", false),
            SetupEvent::ParticipantAdded { name, image } => {
                let mut embed = CreateEmbed::new()
                    .title("✅ Participant added!")
                    .description(format!("**{name}** joined the tournament."))
                    .colour(DONE_COLOUR);
                if let Some(image) = image {
                    embed = embed
                        .thumbnail(image)
                        .field("Image", "✅ Image attached", false);
                }
                embed
                    .field(
                        format!("Participants ({})", self.participants.len()),
                        self.participant_list(),
                        false,
                    )
                    .footer(CreateEmbedFooter::new(
                        "Keep adding participants or type 'done'",
                    ))
            }
            SetupEvent::ChannelPrompt { channels } => {
                let list = channels
                    .iter()
                    .enumerate()
                    .map(|(i, name)| format!("{}. {name}", i + 1))
                    .collect::<Vec<_>>()
                    .join("\n");
                setup(format!(
                    "**Participants:** {} added\n\n**Step 3/6: Tournament channel**\n\nWhich channel should the tournament run in? Send its number or its name.\n\n{}",
                    self.participants.len(),
                    list.chars().take(CHANNEL_LIST_CHARS).collect::<String>()
                ))
            }
            SetupEvent::ChannelSet => setup(format!(
                "**Channel:** #{}\n\n**Step 4/6: Vote duration**\n\nHow long should each vote last?\n\nExamples:\n- `30m` for 30 minutes\n- `2h` for 2 hours\n- `1d` for 1 day",
                self.channel_name()
            )),
            SetupEvent::VoteDurationSet => setup(format!(
                "**Vote duration:** {}\n\n**Step 5/6: Delay between rounds**\n\nHow long between the end of a round and the start of the next one?\n\nExamples:\n- `5m` for 5 minutes\n- `30m` for 30 minutes\n- `1h` for 1 hour",
                format_duration(self.vote_duration)
            )),
            SetupEvent::BackendPrompt => {
                let forms = if self.forms_available {
                    "- `forms`: one Google Form per round"
                } else {
                    "- ~~`forms`~~: Google credentials are not configured"
                };
                setup(format!(
                    "**Delay between rounds:** {}\n\n**Step 6/6: Voting**\n\nHow should people vote?\n\n- `reactions`: react with 1️⃣ or 2️⃣ on each match\n{forms}",
                    format_duration(self.between_rounds)
                ))
            }
            SetupEvent::Summary => self.summary_embed(),
            _ => return None,
        };

        Some(embed)
    }

    /// Plain text answers.
    pub fn text(event: &SetupEvent) -> Option<String> {
        let text = match event {
            SetupEvent::Cancelled => "❌ Setup cancelled.".to_owned(),
            SetupEvent::EmptyName => "❌ Please send some text.".to_owned(),
            SetupEvent::NeedMoreParticipants => format!(
                "❌ At least {MIN_PARTICIPANTS} participants are needed! Keep adding some."
            ),
            SetupEvent::ChannelNotFound => {
                "❌ Channel not found. Try again with its name or number.".to_owned()
            }
            SetupEvent::InvalidDuration { examples } => {
                format!("❌ Invalid duration. Use for example: {examples} (30 days at most)")
            }
            SetupEvent::InvalidBackend => "❌ Answer `reactions` or `forms`.".to_owned(),
            SetupEvent::ConfirmOrCancel => "❌ Use 'confirm' or 'cancel'".to_owned(),
            SetupEvent::Confirmed(_) => "🚀 Starting the tournament...".to_owned(),
            _ => return None,
        };

        Some(text)
    }

    pub fn error_embed(description: &str) -> CreateEmbed {
        CreateEmbed::new()
            .title("❌ Tournament setup")
            .description(description)
            .colour(ERROR_COLOUR)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn channels() -> Vec<ChannelChoice> {
        vec![
            ChannelChoice {
                id: ChannelId::new(10),
                name: "general".to_owned(),
            },
            ChannelChoice {
                id: ChannelId::new(11),
                name: "tournament".to_owned(),
            },
        ]
    }

    fn session(forms_available: bool) -> SetupSession {
        SetupSession::new(GuildId::new(1), UserId::new(2), forms_available)
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30m"), Some(1_800));
        assert_eq!(parse_duration("2H"), Some(7_200));
        assert_eq!(parse_duration("1d"), Some(86_400));
        assert_eq!(parse_duration("0m"), None);
        assert_eq!(parse_duration("1h30m"), None);
        assert_eq!(parse_duration("10s"), None);

        assert_eq!(format_duration(1_800), "30 minutes");
        assert_eq!(format_duration(7_200), "2 hours");
        assert_eq!(format_duration(172_800), "2 days");
    }

    #[test]
    fn durations_are_capped_at_thirty_days() {
        assert_eq!(parse_duration("30d"), Some(MAX_DURATION_SECONDS));
        assert_eq!(parse_duration("720h"), Some(MAX_DURATION_SECONDS));
        assert_eq!(parse_duration("31d"), None);
        assert_eq!(parse_duration("1000000000d"), None);
        assert_eq!(parse_duration("99999999999999999999m"), None);

        let channels = channels();
        let mut s = session(false);
        s.handle("Owls", None, &channels);
        for name in ["Barn", "Snowy", "Tawny", "Eagle", "done", "general"] {
            s.handle(name, None, &channels);
        }
        assert_eq!(
            s.handle("1000000000d", None, &channels),
            SetupEvent::InvalidDuration {
                examples: "30m, 2h, 1d"
            }
        );
        assert_eq!(s.vote_duration, 3_600);
    }

    #[test]
    fn full_walkthrough() {
        let channels = channels();
        let mut s = session(true);

        assert_eq!(s.handle("Owls", None, &channels), SetupEvent::ThemeSet);
        for name in ["Barn", "Snowy", "Tawny"] {
            s.handle(name, None, &channels);
        }
        assert_eq!(s.handle("done", None, &channels), SetupEvent::NeedMoreParticipants);
        assert_eq!(
            s.handle("Eagle", Some("https://cdn.example/eagle.png".to_owned()), &channels),
            SetupEvent::ParticipantAdded {
                name: "Eagle".to_owned(),
                image: Some("https://cdn.example/eagle.png".to_owned()),
            }
        );
        assert_eq!(
            s.handle("DONE", None, &channels),
            SetupEvent::ChannelPrompt {
                channels: vec!["general".to_owned(), "tournament".to_owned()],
            }
        );

        assert_eq!(s.handle("3", None, &channels), SetupEvent::ChannelNotFound);
        assert_eq!(s.handle("tournament", None, &channels), SetupEvent::ChannelSet);
        assert_eq!(
            s.handle("soon", None, &channels),
            SetupEvent::InvalidDuration {
                examples: "30m, 2h, 1d"
            }
        );
        assert_eq!(s.handle("2h", None, &channels), SetupEvent::VoteDurationSet);
        assert_eq!(s.handle("10m", None, &channels), SetupEvent::BackendPrompt);
        assert_eq!(s.handle("carrier pigeon", None, &channels), SetupEvent::InvalidBackend);
        assert_eq!(s.handle("forms", None, &channels), SetupEvent::Summary);
        assert_eq!(s.handle("go", None, &channels), SetupEvent::ConfirmOrCancel);

        let SetupEvent::Confirmed(settings) = s.handle("confirm", None, &channels) else {
            panic!("expected confirmation");
        };
        assert_eq!(settings.theme, "Owls");
        assert_eq!(settings.participants.len(), 4);
        assert_eq!(settings.channel_id, ChannelId::new(11));
        assert_eq!(settings.vote_duration, 7_200);
        assert_eq!(settings.between_rounds, 600);
        assert_eq!(settings.backend, VotingBackend::Forms);
        assert_eq!(settings.creator_id, UserId::new(2));
    }

    #[test]
    fn channel_by_number_is_one_based() {
        let channels = channels();
        let mut s = session(false);
        s.step = Step::Channel;

        assert_eq!(s.handle("0", None, &channels), SetupEvent::ChannelNotFound);
        assert_eq!(s.handle("1", None, &channels), SetupEvent::ChannelSet);
        assert_eq!(s.channel.as_ref().map(|c| c.id), Some(ChannelId::new(10)));
    }

    #[test]
    fn forms_need_credentials() {
        let mut s = session(false);
        s.step = Step::Backend;

        assert_eq!(s.handle("forms", None, &[]), SetupEvent::InvalidBackend);
        assert_eq!(s.handle("Reactions", None, &[]), SetupEvent::Summary);
        assert_eq!(s.backend, VotingBackend::Reactions);
    }

    #[test]
    fn cancel_works_at_any_step() {
        let mut s = session(true);
        s.step = Step::VoteDuration;
        assert_eq!(s.handle(" Cancel ", None, &[]), SetupEvent::Cancelled);
    }

    #[test]
    fn long_participant_lists_keep_the_latest() {
        let mut s = session(true);
        s.step = Step::Participants;
        for i in 0..200 {
            s.handle(&format!("Participant number {i}"), None, &[]);
        }

        let list = s.participant_list();
        assert_eq!(list.chars().count(), PARTICIPANT_LIST_CHARS);
        assert!(list.ends_with("200. Participant number 199"));
    }
}
