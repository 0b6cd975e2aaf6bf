//! Operator confirmation.
//!
//! A prompt loop with states {Prompting, Confirmed, Declined, Aborted}. Unrecognised answers
//! re-prompt; nothing defaults to either choice. Input comes through `OperatorInput` so the
//! loop runs against scripted answers in tests.

use std::io::{self, BufRead, Write};

use colored::Colorize;

use crate::error::{FleetError, FleetResult};

pub trait OperatorInput {
    /// Print `prompt` and read one line. `None` once input is closed.
    fn ask(&self, prompt: &str) -> FleetResult<Option<String>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdinInput;

impl OperatorInput for StdinInput {
    fn ask(&self, prompt: &str) -> FleetResult<Option<String>> {
        eprint!("{} {} ", "??".blue().bold(), prompt);
        io::stderr().flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmState {
    Prompting,
    Confirmed,
    Declined,
    Aborted,
}

impl ConfirmState {
    /// Transition from `Prompting` on one answer.
    pub fn on_answer(self, answer: &str, strict: bool) -> Self {
        if self != ConfirmState::Prompting {
            return self;
        }
        match (answer.trim().to_ascii_lowercase().as_str(), strict) {
            ("yes", _) | ("y", false) => ConfirmState::Confirmed,
            ("no", _) | ("n", false) => ConfirmState::Declined,
            ("quit", _) | ("q", false) => ConfirmState::Aborted,
            _ => ConfirmState::Prompting,
        }
    }
}

/// Ask until the answer settles. `strict` (destructive actions) only takes full words.
pub fn confirm(input: &dyn OperatorInput, question: &str, strict: bool) -> FleetResult<ConfirmState> {
    let choices = if strict { "[yes/no/quit]" } else { "[y/n/q]" };
    let prompt = format!("{question} {choices}");
    let mut state = ConfirmState::Prompting;

    while state == ConfirmState::Prompting {
        let Some(answer) = input.ask(&prompt)? else {
            return Ok(ConfirmState::Aborted);
        };
        state = state.on_answer(&answer, strict);
        if state == ConfirmState::Prompting {
            if strict {
                println!("   Please type yes, no or quit.");
            } else {
                println!("   Please answer y, n or q.");
            }
        }
    }
    Ok(state)
}

/// Ask for one of `choices`, re-prompting on anything else.
pub fn choose<'a>(
    input: &dyn OperatorInput,
    question: &str,
    choices: &[&'a str],
) -> FleetResult<&'a str> {
    let prompt = format!("{question} [{}]", choices.join("/"));
    loop {
        let Some(answer) = input.ask(&prompt)? else {
            return Err(FleetError::Aborted);
        };
        let answer = answer.trim().to_ascii_lowercase();
        if answer == "quit" {
            return Err(FleetError::Aborted);
        }
        if let Some(choice) = choices.iter().find(|c| **c == answer) {
            return Ok(*choice);
        }
        println!("   Please answer one of: {}", choices.join(", "));
    }
}
