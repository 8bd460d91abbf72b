//! Input parser - Splits console lines into chat text and slash commands

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text for the selected group
    Chat(String),
    /// `/name arg1 arg2 ...`
    Command { name: String, args: Vec<String> },
    Empty,
}

/// Parses raw console lines
pub struct InputParser {
    command_prefix: String,
}

impl InputParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn parse(&self, line: &str) -> Input {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Input::Empty;
        }

        match line.strip_prefix(self.command_prefix.as_str()) {
            Some(rest) => self.parse_command(rest),
            None => Input::Chat(line.to_string()),
        }
    }

    fn parse_command(&self, text: &str) -> Input {
        let mut parts = text.split_whitespace();
        let Some(name) = parts.next() else {
            return Input::Empty;
        };

        Input::Command {
            name: name.to_string(),
            args: parts.map(str::to_string).collect(),
        }
    }
}

impl Default for InputParser {
    fn default() -> Self {
        Self::new("/")
    }
}
