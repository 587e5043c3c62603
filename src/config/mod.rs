//! Configuration module: prompts and navigation shortcuts.

mod prompts;
mod sites;

pub use prompts::{get_system_prompt, SYSTEM_PROMPT};
pub use sites::{get_destination, shortcut_lines, DIRECT_DESTINATIONS};
