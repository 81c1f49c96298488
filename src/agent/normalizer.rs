//! Turning a raw platform message into a question with context.

use crate::error::PlatformError;
use crate::messaging::ChatPlatformDyn;
use crate::{BotIdentity, InboundMessage};

use regex::Regex;

/// Maximum number of ancestors followed through reply references.
pub const MAX_REPLY_DEPTH: usize = 5;

/// Placeholder for ancestors without text.
pub const NO_TEXT_CONTENT: &str = "<no text content>";

/// Strip the bot's own mentions and resolve other users' mentions to display
/// names. Returns `None` when nothing remains to ask.
pub fn clean_question(message: &InboundMessage, identity: &BotIdentity) -> Option<String> {
    let mut question = mention_pattern(identity.id)
        .replace_all(&message.content, "")
        .trim()
        .to_string();

    let names = std::iter::once(identity.name.as_str()).chain(identity.nickname.as_deref());
    for name in names.filter(|name| !name.is_empty()) {
        let pattern = Regex::new(&format!("(?i)@{}", regex::escape(name)));
        if let Ok(pattern) = pattern {
            question = pattern.replace_all(&question, "").trim().to_string();
        }
    }

    for user in message.mentions.iter().filter(|user| user.id != identity.id) {
        question = mention_pattern(user.id)
            .replace_all(&question, regex::NoExpand(&user.display_name))
            .trim()
            .to_string();
    }

    (!question.is_empty()).then_some(question)
}

fn mention_pattern(user_id: u64) -> Regex {
    Regex::new(&format!("<@!?{user_id}>")).expect("mention pattern built from a numeric id")
}

/// Ancestors of a message, reconstructed through reply references.
#[derive(Debug, Clone, Default)]
pub struct ReplyChain {
    /// `"{author}: {text}"`, oldest first.
    pub entries: Vec<String>,
    /// Fetched ancestors, nearest first.
    pub ancestors: Vec<InboundMessage>,
}

impl ReplyChain {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Follow up to [`MAX_REPLY_DEPTH`] reply references.
///
/// Missing or inaccessible ancestors end the walk early. Any other platform
/// error is returned.
pub async fn collect_reply_chain(
    platform: &dyn ChatPlatformDyn,
    message: &InboundMessage,
) -> Result<ReplyChain, PlatformError> {
    let mut ancestors = Vec::new();
    let mut next = message.reply_to;

    while let Some(reference) = next {
        if ancestors.len() >= MAX_REPLY_DEPTH {
            break;
        }
        match platform.fetch_message(message.channel_id, reference).await {
            Ok(ancestor) => {
                next = ancestor.reply_to;
                ancestors.push(ancestor);
            }
            Err(error) if error.truncates_chain() => {
                tracing::warn!(
                    message_id = message.id,
                    %error,
                    "could not fetch reply chain"
                );
                break;
            }
            Err(error) => return Err(error),
        }
    }

    let entries = ancestors
        .iter()
        .rev()
        .map(|ancestor| {
            let text = if ancestor.content.is_empty() {
                NO_TEXT_CONTENT
            } else {
                ancestor.content.as_str()
            };
            format!("{}: {}", ancestor.author_name, text)
        })
        .collect();

    Ok(ReplyChain { entries, ancestors })
}

/// Image URLs from the message itself, or else from the nearest ancestor
/// carrying any.
pub fn collect_images(message: &InboundMessage, chain: &ReplyChain) -> Vec<String> {
    let own = message.image_urls();
    if !own.is_empty() {
        return own;
    }
    chain
        .ancestors
        .iter()
        .map(InboundMessage::image_urls)
        .find(|urls| !urls.is_empty())
        .unwrap_or_default()
}

/// The text sent to the model: the question alone, or the question after the
/// conversation history.
pub fn build_context(question: &str, chain: &ReplyChain, author_name: &str) -> String {
    if chain.is_empty() {
        return question.to_string();
    }
    format!(
        "Conversation history:\n{}\nCurrent question from {author_name}: {question}",
        chain.entries.join("\n")
    )
}

/// Mentions of everyone except the bot, prepended to the first reply chunk.
pub fn mention_prefix(message: &InboundMessage, identity: &BotIdentity) -> String {
    let mentions: Vec<String> = message
        .mentions
        .iter()
        .filter(|user| user.id != identity.id)
        .map(|user| format!("<@!{}>", user.id))
        .collect();

    if mentions.is_empty() {
        String::new()
    } else {
        format!("{} ", mentions.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::traits::testing::FakePlatform;
    use crate::{Attachment, MentionedUser};

    const BOT_ID: u64 = 123;

    fn identity() -> BotIdentity {
        BotIdentity {
            id: BOT_ID,
            name: "GrokBot".into(),
            nickname: Some("Grok Helper".into()),
        }
    }

    fn message(id: u64, content: &str, reply_to: Option<u64>) -> InboundMessage {
        InboundMessage {
            id,
            channel_id: 10,
            guild_id: Some(1),
            author_id: 500 + id,
            author_name: format!("user{id}"),
            content: content.into(),
            attachments: Vec::new(),
            reply_to,
            mentions: Vec::new(),
        }
    }

    fn image(url: &str) -> Attachment {
        Attachment {
            filename: "pic.png".into(),
            url: url.into(),
            content_type: Some("image/png".into()),
            size: 1,
        }
    }

    fn mention(id: u64, name: &str) -> MentionedUser {
        MentionedUser {
            id,
            display_name: name.into(),
        }
    }

    #[test]
    fn strips_bot_mention_and_resolves_others() {
        let mut msg = message(1, "<@123> hello <@456>", None);
        msg.mentions = vec![mention(BOT_ID, "GrokBot"), mention(456, "Bob")];
        assert_eq!(clean_question(&msg, &identity()).as_deref(), Some("hello Bob"));
    }

    #[test]
    fn strips_nickname_forms_and_names_case_insensitively() {
        let msg = message(1, "<@!123> @grokbot what is @GROK HELPER up to?", None);
        assert_eq!(
            clean_question(&msg, &identity()).as_deref(),
            Some("what is  up to?")
        );
    }

    #[test]
    fn display_names_are_inserted_literally() {
        let mut msg = message(1, "<@123> ask <@7>", None);
        msg.mentions = vec![mention(7, "$1 dollar")];
        assert_eq!(clean_question(&msg, &identity()).as_deref(), Some("ask $1 dollar"));
    }

    #[test]
    fn mention_only_message_has_no_question() {
        let mut msg = message(1, "  <@123>  ", None);
        msg.mentions = vec![mention(BOT_ID, "GrokBot")];
        assert_eq!(clean_question(&msg, &identity()), None);
    }

    #[tokio::test]
    async fn reply_chain_is_bounded_and_chronological() {
        let platform = FakePlatform::new(identity());
        for id in 1..=8 {
            let parent = (id > 1).then(|| id - 1);
            platform.insert(message(id, &format!("message {id}"), parent));
        }
        let current = message(9, "<@123> summarize", Some(8));

        let chain = collect_reply_chain(&platform, &current).await.unwrap();

        assert_eq!(
            chain.entries,
            vec![
                "user4: message 4",
                "user5: message 5",
                "user6: message 6",
                "user7: message 7",
                "user8: message 8",
            ]
        );
        assert_eq!(platform.fetch_count(), MAX_REPLY_DEPTH);
    }

    #[tokio::test]
    async fn missing_ancestor_truncates_chain() {
        let platform = FakePlatform::new(identity());
        platform.insert(message(2, "", Some(1)));
        let current = message(3, "question", Some(2));

        let chain = collect_reply_chain(&platform, &current).await.unwrap();
        assert_eq!(chain.entries, vec!["user2: <no text content>"]);

        platform.forbidden.lock().unwrap().push(2);
        let chain = collect_reply_chain(&platform, &current).await.unwrap();
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn images_come_from_message_or_nearest_ancestor() {
        let platform = FakePlatform::new(identity());
        let mut root = message(1, "root", None);
        root.attachments = vec![image("https://cdn/root.png")];
        let mut middle = message(2, "middle", Some(1));
        middle.attachments = vec![image("https://cdn/middle.png")];
        platform.insert(root);
        platform.insert(middle);

        let current = message(3, "what is this", Some(2));
        let chain = collect_reply_chain(&platform, &current).await.unwrap();
        assert_eq!(collect_images(&current, &chain), vec!["https://cdn/middle.png"]);
        assert_eq!(platform.fetch_count(), 2);

        let mut own = current.clone();
        own.attachments = vec![image("https://cdn/own.png")];
        assert_eq!(collect_images(&own, &chain), vec!["https://cdn/own.png"]);
    }

    #[test]
    fn context_includes_history_only_when_present() {
        let empty = ReplyChain::default();
        assert_eq!(build_context("why?", &empty, "alice"), "why?");

        let chain = ReplyChain {
            entries: vec!["bob: it rains".into(), "carol: again".into()],
            ancestors: Vec::new(),
        };
        assert_eq!(
            build_context("why?", &chain, "alice"),
            "Conversation history:\nbob: it rains\ncarol: again\nCurrent question from alice: why?"
        );
    }

    #[test]
    fn prefix_mentions_everyone_but_the_bot() {
        let mut msg = message(1, "", None);
        assert_eq!(mention_prefix(&msg, &identity()), "");
        msg.mentions = vec![mention(BOT_ID, "GrokBot"), mention(4, "a"), mention(5, "b")];
        assert_eq!(mention_prefix(&msg, &identity()), "<@!4> <@!5> ");
    }
}
