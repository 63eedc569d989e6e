//! Terminal echo of the conversation.

use crate::pipeline::error::ModuleError;
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Prints every committed, non-blank text unit as a dialogue line.
///
/// Subscribe it to the recognizer and the responder to follow both sides of
/// the conversation. Terminal: never emits.
pub struct DialogueEcho {
    writer: Box<dyn Write + Send>,
    color: bool,
}

impl Default for DialogueEcho {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogueEcho {
    /// Echoes to stderr, with colors.
    pub fn new() -> Self {
        Self {
            writer: Box::new(io::stderr()),
            color: true,
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}

/// Formats one dialogue line.
pub fn render_line(creator: &str, text: &str, color: bool) -> String {
    let label = match creator {
        "recognizer" => "you",
        "responder" => "parley",
        other => other,
    };
    if !color {
        return format!("{}: {}", label, text);
    }
    match creator {
        "recognizer" => format!("{} {}", format!("{}:", label).cyan().bold(), text),
        "responder" => format!("{} {}", format!("{}:", label).green().bold(), text),
        _ => format!("{} {}", format!("{}:", label).dimmed(), text),
    }
}

impl Module for DialogueEcho {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn process_update(
        &mut self,
        message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        for (unit, tag) in message.iter() {
            if tag != UpdateType::Commit {
                continue;
            }
            if let Some(text) = unit.as_text()
                && !text.trim().is_empty()
            {
                writeln!(self.writer, "{}", render_line(unit.creator(), text, self.color))
                    .map_err(|e| ModuleError::recoverable(format!("echo failed: {}", e)))?;
            }
        }
        Ok(None)
    }
}
