// Content classifier - ordered, stateless predicates over message text.
//
// Produces at most one category per message. Evaluation order is fixed:
// links, then bot usernames, then plain usernames. A disabled category is
// skipped entirely, not merely unreported - with links off, a URL in the
// text is invisible to the classifier.
//
// Bio checking is NOT done here: it needs a transport round-trip, so the
// pipeline fetches the bio lazily and feeds it to `matches_any`.

use super::moderation_models::{ChatPolicy, ViolationCategory};
use regex::{Regex, RegexBuilder};

pub struct ContentClassifier {
    link_pattern: Regex,
    bot_username_pattern: Regex,
    username_pattern: Regex,
}

impl ContentClassifier {
    /// Build a classifier recognizing `http(s)://` plus the given domain
    /// literals. The literals come from configuration, not from here.
    pub fn new(link_domains: &[String]) -> Result<Self, regex::Error> {
        let mut alternatives = vec!["https?://".to_string()];
        alternatives.extend(link_domains.iter().map(|d| regex::escape(d)));
        let link_pattern = RegexBuilder::new(&format!("({})", alternatives.join("|")))
            .case_insensitive(true)
            .build()?;

        let bot_username_pattern = RegexBuilder::new(r"@\w*bot\b")
            .case_insensitive(true)
            .build()?;
        let username_pattern = Regex::new(r"@\w+")?;

        Ok(Self {
            link_pattern,
            bot_username_pattern,
            username_pattern,
        })
    }

    /// Classify message text against the chat's policy.
    ///
    /// Short-circuits on the first enabled predicate that matches. Returns
    /// `None` for clean text; the caller decides whether to go on to the
    /// bio check.
    pub fn classify(&self, text: &str, policy: &ChatPolicy) -> Option<ViolationCategory> {
        if text.is_empty() {
            return None;
        }
        if policy.links && self.has_links(text) {
            return Some(ViolationCategory::Links);
        }
        if policy.bot_usernames && self.has_bot_username(text) {
            return Some(ViolationCategory::BotUsername);
        }
        if policy.usernames && self.has_username(text) {
            return Some(ViolationCategory::Username);
        }
        None
    }

    /// Whether any of the three textual predicates match, ignoring policy.
    /// Used for profile bios, which are gated by a single flag.
    pub fn matches_any(&self, text: &str) -> bool {
        !text.is_empty()
            && (self.has_links(text) || self.has_bot_username(text) || self.has_username(text))
    }

    fn has_links(&self, text: &str) -> bool {
        self.link_pattern.is_match(text)
    }

    fn has_bot_username(&self, text: &str) -> bool {
        self.bot_username_pattern.is_match(text)
    }

    fn has_username(&self, text: &str) -> bool {
        self.username_pattern.is_match(text)
    }
}
