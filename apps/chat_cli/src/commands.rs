use shared::domain::{FriendEdgeId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Friends(Option<String>),
    Requests,
    Select(UserId),
    Leave,
    Add,
    Cancel,
    Propose(String),
    Accept(FriendEdgeId),
    Who,
    Help,
    Quit,
    Send(String),
}

pub const HELP: &str = "\
/friends [filter]   list friends, optionally filtered by name
/requests           list friend requests you can accept
/select <userId>    open the conversation with a friend
/leave              close the current conversation
/add                show people you could add
/cancel             stop adding friends
/propose <email>    send a friend request
/accept <requestId> accept a friend request
/who                show the selected friend and connection
/quit               exit
anything else is sent to the selected friend";

impl Command {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Ok(Command::Send(line.to_string())));
        }

        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let parsed = match name {
            "/friends" => Ok(Command::Friends(arg)),
            "/requests" => Ok(Command::Requests),
            "/select" => parse_id(arg, "/select <userId>").map(|id| Command::Select(UserId(id))),
            "/leave" => Ok(Command::Leave),
            "/add" => Ok(Command::Add),
            "/cancel" => Ok(Command::Cancel),
            "/propose" => arg
                .map(Command::Propose)
                .ok_or_else(|| "usage: /propose <email>".to_string()),
            "/accept" => {
                parse_id(arg, "/accept <requestId>").map(|id| Command::Accept(FriendEdgeId(id)))
            }
            "/who" => Ok(Command::Who),
            "/help" => Ok(Command::Help),
            "/quit" | "/exit" => Ok(Command::Quit),
            other => Err(format!("unknown command {other}, try /help")),
        };
        Some(parsed)
    }
}

fn parse_id(arg: Option<String>, usage: &str) -> Result<i64, String> {
    arg.as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| format!("usage: {usage}"))
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
