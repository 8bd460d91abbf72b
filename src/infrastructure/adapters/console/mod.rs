//! Console adapter for running a chat session in a terminal

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::application::services::Deliver;

/// Line-based terminal front end for a chat session
pub struct ConsoleAdapter {
    lines: Lines<BufReader<Stdin>>,
    prompt: String,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: ">>> ".to_string(),
        }
    }

    /// Callback printing delivered chat lines
    pub fn printer(&self) -> Deliver {
        Arc::new(|line: String| {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
            let _ = stdout.flush();
        })
    }

    /// Next input line, or `None` at end of input
    pub async fn read_line(&mut self) -> Option<String> {
        {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{}", self.prompt);
            let _ = stdout.flush();
        }

        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read console input: {}", e);
                None
            }
        }
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new()
    }
}
