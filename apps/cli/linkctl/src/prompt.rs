//! Interactive trust confirmation on the terminal.

use link_core::{TofuDecision, TofuPrompt};

use std::io::{BufRead, Write, stderr, stdin};

use log::warn;

/// Invalid answers tolerated before treating the prompt as declined.
const MAX_ATTEMPTS: usize = 3;

/// Ask on stderr, read the answer from stdin.
pub fn confirm_on_terminal(prompt: &TofuPrompt) -> TofuDecision {
    ask(prompt, &mut stdin().lock(), &mut stderr())
}

/// `yes` accepts a first contact or re-pins a changed certificate; anything
/// that is not `yes` (including end of input) declines.
pub fn ask(prompt: &TofuPrompt, input: &mut impl BufRead, output: &mut impl Write) -> TofuDecision {
    let question = match prompt {
        TofuPrompt::FirstContact { .. } => "Trust this daemon and remember its certificate?",
        TofuPrompt::Mismatch { .. } => "Replace the pinned certificate with the presented one?",
    };
    let accepted = match prompt {
        TofuPrompt::FirstContact { .. } => TofuDecision::Accept,
        TofuPrompt::Mismatch { .. } => TofuDecision::Repin,
    };

    if writeln!(output, "{prompt}").is_err() {
        return TofuDecision::Reject;
    }

    for _ in 0..MAX_ATTEMPTS {
        if write!(output, "{question} [yes/no]: ").and_then(|()| output.flush()).is_err() {
            return TofuDecision::Reject;
        }

        let mut answer = String::new();
        match input.read_line(&mut answer) {
            Ok(0) | Err(_) => return TofuDecision::Reject,
            Ok(_) => {}
        }

        match answer.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => return accepted,
            "no" | "n" | "" => return TofuDecision::Reject,
            other => {
                let _ = writeln!(output, "Please answer 'yes' or 'no' (got '{other}').");
            }
        }
    }

    warn!("No valid answer to the trust prompt; declining");
    TofuDecision::Reject
}
