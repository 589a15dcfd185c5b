//! Control-command parsing for the LINE text protocol.
//!
//! Literal tokens in both the English and Japanese locales map to control
//! operations; everything else is treated as manual-post text.

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SwitchPersona(String),
    /// `persona` with no name, answered with a usage hint.
    PersonaUsage,
    /// Free text: posted into the live chat when the bot is running.
    Post(String),
}

const PERSONA_PREFIXES: [&str; 2] = ["persona", "ペルソナ"];

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();

        if text.eq_ignore_ascii_case("start") || text == "起動" {
            return Self::Start;
        }
        if text.eq_ignore_ascii_case("stop") || text == "停止" {
            return Self::Stop;
        }
        if let Some(arg) = persona_argument(text) {
            return match arg {
                "" => Self::PersonaUsage,
                name => Self::SwitchPersona(name.to_string()),
            };
        }

        Self::Post(text.to_string())
    }
}

/// Returns the argument following a persona prefix, or `None` when the
/// text is not a persona command at all.
fn persona_argument(text: &str) -> Option<&str> {
    let lower = text.to_lowercase();
    for prefix in PERSONA_PREFIXES {
        if !lower.starts_with(prefix) {
            continue;
        }
        // ASCII lowercasing preserves byte offsets; get() guards the
        // exotic case where it would not.
        let Some(rest) = text.get(prefix.len()..) else {
            continue;
        };
        if rest.is_empty() {
            return Some("");
        }
        if rest.starts_with(char::is_whitespace) {
            return Some(rest.trim());
        }
        // e.g. "personae" — not a command
    }
    None
}
