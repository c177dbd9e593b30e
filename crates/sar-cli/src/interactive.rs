//! Interactive conflict prompt for the terminal

use dialoguer::Select;
use sar_core::{Prompt, PromptChoice};
use std::io::{self, IsTerminal};
use std::path::Path;

const OPTIONS: [&str; 5] = [
    "[Y]es, overwrite",
    "[N]o, skip",
    "[A]ll, overwrite all remaining",
    "N[o]ne, skip all remaining",
    "[Q]uit",
];

/// Asks on stderr, reads the answer from the terminal
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn is_available(&self) -> bool {
        io::stdin().is_terminal() && io::stderr().is_terminal()
    }

    fn ask(&mut self, path: &Path) -> io::Result<PromptChoice> {
        let prompt = format!("File already exists: {}. Overwrite?", path.display());
        let selection = Select::new()
            .with_prompt(prompt)
            .items(&OPTIONS)
            .default(1)
            .interact()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(match selection {
            0 => PromptChoice::Yes,
            2 => PromptChoice::AllRemaining,
            3 => PromptChoice::NoneRemaining,
            4 => PromptChoice::Quit,
            _ => PromptChoice::No,
        })
    }
}
