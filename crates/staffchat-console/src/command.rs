use staffchat_types::{ConversationId, MessageId};

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(ConversationId),
    Close,
    Older,
    Read,
    React { message_id: MessageId, emoji: String },
    Retry(MessageId),
    Delete { message_id: MessageId, hard: bool },
    List,
    Send(String),
    Quit,
}

pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let command = match name {
        "open" => Command::Open(number(words.next(), "conversation id")?),
        "close" => Command::Close,
        "older" => Command::Older,
        "read" => Command::Read,
        "react" => {
            let message_id = MessageId::Confirmed(number(words.next(), "message id")?);
            let emoji = words.next().ok_or("usage: /react <message id> <emoji>")?;
            Command::React {
                message_id,
                emoji: emoji.to_string(),
            }
        }
        "retry" => {
            let raw = words.next().ok_or("usage: /retry <message id>")?;
            Command::Retry(message_id(raw)?)
        }
        "delete" | "purge" => Command::Delete {
            message_id: MessageId::Confirmed(number(words.next(), "message id")?),
            hard: name == "purge",
        },
        "list" => Command::List,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command /{}", other)),
    };
    Ok(Some(command))
}

fn number(word: Option<&str>, what: &str) -> Result<i64, String> {
    let word = word.ok_or_else(|| format!("missing {}", what))?;
    word.parse().map_err(|_| format!("invalid {}: {}", what, word))
}

fn message_id(raw: &str) -> Result<MessageId, String> {
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(MessageId::Confirmed(id));
    }
    raw.parse()
        .map(MessageId::Temporary)
        .map_err(|e| format!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use staffchat_types::TempId;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(
            parse("  towels to 314 please ").unwrap(),
            Some(Command::Send("towels to 314 please".into()))
        );
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse("/open 12").unwrap(), Some(Command::Open(12)));
        assert_eq!(
            parse("/react 40 👍").unwrap(),
            Some(Command::React {
                message_id: MessageId::Confirmed(40),
                emoji: "👍".into()
            })
        );
        assert_eq!(
            parse("/purge 9").unwrap(),
            Some(Command::Delete {
                message_id: MessageId::Confirmed(9),
                hard: true
            })
        );
        assert_eq!(parse("/exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn retry_accepts_temporary_ids() {
        let temp = TempId::new(7);
        assert_eq!(
            parse(&format!("/retry {}", temp)).unwrap(),
            Some(Command::Retry(MessageId::Temporary(temp)))
        );
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse("/open lobby").is_err());
        assert!(parse("/react 4").is_err());
        assert!(parse("/dance").is_err());
    }
}
