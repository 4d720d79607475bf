//! Timestamping of user messages before they reach the model.
//!
//! Each user message becomes `[Time: YYYY-MM-DD HH:MM:SS]` on its own line
//! followed by the original text inside `<inputs>` tags. Already wrapped
//! messages are left alone.

use chrono::{DateTime, TimeZone};

use citeweave_shared::{ChatMessage, Role};

const TIME_PREFIX: &str = "[Time: ";
const INPUTS_OPEN: &str = "<inputs>";
const INPUTS_CLOSE: &str = "</inputs>";

/// Wrap one user message; other roles pass through unchanged.
pub fn wrap_user_message<Tz>(message: &ChatMessage, now: &DateTime<Tz>) -> ChatMessage
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match message.role {
        Role::User if !is_wrapped(&message.content) => ChatMessage {
            role: message.role,
            content: format!(
                "{TIME_PREFIX}{}]\n{INPUTS_OPEN}{}{INPUTS_CLOSE}",
                now.format("%Y-%m-%d %H:%M:%S"),
                message.content
            ),
        },
        _ => message.clone(),
    }
}

/// Wrap every user message of a conversation in place.
pub fn wrap_user_messages<Tz>(messages: &mut [ChatMessage], now: &DateTime<Tz>)
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    for message in messages.iter_mut() {
        *message = wrap_user_message(message, now);
    }
}

fn is_wrapped(content: &str) -> bool {
    content.starts_with(TIME_PREFIX)
        && content
            .split_once('\n')
            .is_some_and(|(_, rest)| rest.starts_with(INPUTS_OPEN) && rest.ends_with(INPUTS_CLOSE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 5).unwrap()
    }

    #[test]
    fn user_message_is_stamped_and_wrapped() {
        let wrapped = wrap_user_message(&ChatMessage::user("what is rust?"), &noon());
        assert_eq!(
            wrapped.content,
            "[Time: 2026-03-04 12:00:05]\n<inputs>what is rust?</inputs>"
        );
    }

    #[test]
    fn timestamp_uses_the_given_zone() {
        let beijing = FixedOffset::east_opt(8 * 3600).unwrap();
        let wrapped = wrap_user_message(&ChatMessage::user("hi"), &noon().with_timezone(&beijing));
        assert!(wrapped.content.starts_with("[Time: 2026-03-04 20:00:05]"));
    }

    #[test]
    fn assistant_messages_and_wrapped_input_untouched() {
        let assistant = ChatMessage::assistant("answer");
        assert_eq!(wrap_user_message(&assistant, &noon()), assistant);

        let mut conversation = vec![ChatMessage::user("q"), assistant.clone()];
        wrap_user_messages(&mut conversation, &noon());
        let once = conversation.clone();
        wrap_user_messages(&mut conversation, &noon());
        assert_eq!(conversation, once);
        assert_eq!(conversation[1], assistant);
    }
}
