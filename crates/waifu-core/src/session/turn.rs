use chrono::{DateTime, Local};

/// Sent instead of reading input when the user's name or relation is unknown.
pub const ASK_PROFILE_REQUEST: &str = "$You've suddenly blanked on the user's name and the nature of your relationship with them. Ask the user - sounding a bit flustered - for both pieces of information, and don't continue with any other conversation until they're confirmed.";

/// Inputs that end the session instead of starting a turn.
pub const EXIT_COMMANDS: [&str; 2] = ["exit", "bye"];

/// One user-input/assistant-response exchange. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: u64,
    pub input_text: String,
    pub started_at: DateTime<Local>,
}

impl Turn {
    pub fn new(id: u64, input_text: impl Into<String>) -> Self {
        Self {
            id,
            input_text: input_text.into(),
            started_at: Local::now(),
        }
    }
}

/// How the rendering phase of a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// ESC: the reply was abandoned, the session continues.
    Interrupted,
    /// Ctrl-C: the session ends.
    ExitRequested,
}

/// What a responder needs to open one reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub turn_id: u64,
    pub text: String,
    pub context_id: Option<String>,
}

pub fn is_exit_command(input: &str) -> bool {
    EXIT_COMMANDS.contains(&input)
}

/// Wraps the first request of a session with the current date and time.
///
/// Inputs starting with `$` are already instructions to the assistant and
/// only get the timestamp appended.
pub fn first_request_text(input: &str, now: DateTime<Local>) -> String {
    let now = now.format("%Y/%m/%d %H:%M:%S");
    if input.starts_with('$') {
        format!("{input}\nThe current date and time is {now}.")
    } else {
        format!(
            "$You received the following request from the user. Please begin the conversation.\nThe current date and time is {now}.\n\n{input}"
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 9, 7, 5, 0).unwrap()
    }

    #[test]
    fn test_first_request_wraps_plain_input() {
        let text = first_request_text("hello", fixed_now());
        assert!(text.starts_with("$You received the following request"));
        assert!(text.contains("The current date and time is 2025/03/09 07:05:00."));
        assert!(text.ends_with("\n\nhello"));
    }

    #[test]
    fn test_first_request_appends_to_instruction() {
        let text = first_request_text("$Say hi.", fixed_now());
        assert_eq!(
            text,
            "$Say hi.\nThe current date and time is 2025/03/09 07:05:00."
        );
    }

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("bye"));
        assert!(is_exit_command("exit"));
        assert!(!is_exit_command("Bye now"));
    }
}
