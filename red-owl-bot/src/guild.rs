use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId, UserId};

use crate::store::PersistedState;

/// A keyword that triggers an automatic reply when a given member says it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResponseRule {
    pub keyword: String,
    pub response: String,
}

/// Per-guild settings changed through commands.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GuildSettings {
    /// Rules per member, in the order they were added
    #[serde(default)]
    pub response_rules: HashMap<UserId, Vec<ResponseRule>>,
    #[serde(default)]
    pub alt_text_channels: BTreeSet<ChannelId>,
}

impl GuildSettings {
    /// Add or replace a rule. Replacing keeps the rule's original position.
    pub fn set_response(&mut self, user_id: UserId, keyword: String, response: String) {
        let rules = self.response_rules.entry(user_id).or_default();
        match rules.iter_mut().find(|rule| rule.keyword == keyword) {
            Some(rule) => rule.response = response,
            None => rules.push(ResponseRule { keyword, response }),
        }
    }

    /// Returns whether a rule was removed.
    pub fn remove_response(&mut self, user_id: UserId, keyword: &str) -> bool {
        let Some(rules) = self.response_rules.get_mut(&user_id) else {
            return false;
        };

        let before = rules.len();
        rules.retain(|rule| rule.keyword != keyword);
        let removed = rules.len() != before;

        if rules.is_empty() {
            self.response_rules.remove(&user_id);
        }

        removed
    }

    /// The response of the first rule whose keyword appears in `content`.
    pub fn find_response(&self, user_id: UserId, content: &str) -> Option<&str> {
        self.response_rules
            .get(&user_id)?
            .iter()
            .find(|rule| content.contains(&rule.keyword))
            .map(|rule| rule.response.as_str())
    }

    /// Flip alt-text generation for a channel. Returns the new state.
    pub fn toggle_alt_text(&mut self, channel_id: ChannelId) -> bool {
        if self.alt_text_channels.remove(&channel_id) {
            false
        } else {
            self.alt_text_channels.insert(channel_id);
            true
        }
    }
}

pub type GuildStore = PersistedState<HashMap<GuildId, GuildSettings>>;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const USER: UserId = UserId::new(42);

    #[test]
    fn first_matching_rule_wins() {
        let mut settings = GuildSettings::default();
        settings.set_response(USER, "hello".into(), "hi!".into());
        settings.set_response(USER, "hell".into(), "language!".into());

        assert_eq!(settings.find_response(USER, "well hello there"), Some("hi!"));
        assert_eq!(settings.find_response(USER, "what the hell"), Some("language!"));
        assert_eq!(settings.find_response(USER, "nothing"), None);
        assert_eq!(settings.find_response(UserId::new(7), "hello"), None);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut settings = GuildSettings::default();
        settings.set_response(USER, "a".into(), "1".into());
        settings.set_response(USER, "b".into(), "2".into());
        settings.set_response(USER, "a".into(), "3".into());

        assert_eq!(
            settings.response_rules[&USER],
            vec![
                ResponseRule {
                    keyword: "a".into(),
                    response: "3".into()
                },
                ResponseRule {
                    keyword: "b".into(),
                    response: "2".into()
                },
            ]
        );
    }

    #[test]
    fn removing_last_rule_drops_member() {
        let mut settings = GuildSettings::default();
        settings.set_response(USER, "a".into(), "1".into());

        assert!(!settings.remove_response(USER, "missing"));
        assert!(settings.remove_response(USER, "a"));
        assert!(settings.response_rules.is_empty());
    }

    #[test]
    fn alt_text_toggles() {
        let mut settings = GuildSettings::default();
        let channel = ChannelId::new(5);

        assert!(settings.toggle_alt_text(channel));
        assert!(!settings.toggle_alt_text(channel));
        assert!(settings.alt_text_channels.is_empty());
    }
}
