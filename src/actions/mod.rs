//! Actions module: the action vocabulary and its executor.

mod action;
mod handler;

pub use action::{
    parse_action, Action, ActionKind, ActionParseError, ClarifyOption, ScrollDirection,
};
pub use handler::{
    ActionError, ActionExecutor, ActionOutcome, DEFAULT_NAVIGATION_TIMEOUT, DEFAULT_WAIT_DURATION,
};
