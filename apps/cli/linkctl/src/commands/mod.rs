pub mod login;
pub mod logout;
pub mod status;
pub mod trust;

use std::io::{IsTerminal, stdin};

/// The trust prompt is only offered when someone can answer it.
pub(crate) fn is_interactive() -> bool {
    stdin().is_terminal()
}
