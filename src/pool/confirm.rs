//! Interactive approval before a run starts

use console::Term;
use dialoguer::Confirm as Prompt;
use std::io::{self, BufRead, Write};

/// Asks the operator a yes/no question
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> io::Result<bool>;
}

/// Prompts the operator before a run
///
/// On a terminal this is a `dialoguer` prompt on stderr that defaults to no.
/// With stdin piped, one line is read and only `y`/`yes` approves.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> io::Result<bool> {
        let term = Term::stderr();
        if term.is_term() && console::user_attended_stderr() {
            return Prompt::new()
                .with_prompt(question)
                .default(false)
                .wait_for_newline(true)
                .interact_on(&term)
                .map_err(io::Error::other);
        }

        let stdin = io::stdin();
        let mut stderr = io::stderr();
        ask(question, &mut stdin.lock(), &mut stderr)
    }
}

/// Fixed answer, for non-interactive runs and tests
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _question: &str) -> io::Result<bool> {
        Ok(self.0)
    }
}

/// Single line answer; anything but `y`/`yes` declines
pub(crate) fn ask(
    question: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> io::Result<bool> {
    write!(output, "{question} [y/N] ")?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        writeln!(output)?;
        return Ok(false);
    }
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ask_accepts_yes() {
        for answer in ["y\n", "YES\n", "  yes  \n"] {
            let mut input = Cursor::new(answer);
            let mut output = Vec::new();
            assert!(ask("Download these 3 files?", &mut input, &mut output).unwrap());
            assert_eq!(
                String::from_utf8(output).unwrap(),
                "Download these 3 files? [y/N] "
            );
        }
    }

    #[test]
    fn test_unclear_answer_declines_without_reprompt() {
        let mut input = Cursor::new("maybe\ny\n");
        let mut output = Vec::new();
        assert!(!ask("Continue?", &mut input, &mut output).unwrap());
        assert_eq!(String::from_utf8(output).unwrap().matches("[y/N]").count(), 1);

        // The second line is never consumed
        let mut rest = String::new();
        input.read_line(&mut rest).unwrap();
        assert_eq!(rest, "y\n");
    }

    #[test]
    fn test_empty_answer_and_no_decline() {
        for answer in ["\n", "n\n", "no\n", "nope\n"] {
            let mut input = Cursor::new(answer);
            let mut output = Vec::new();
            assert!(!ask("Continue?", &mut input, &mut output).unwrap(), "{answer:?}");
        }
    }

    #[test]
    fn test_ask_declines_on_eof() {
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        assert!(!ask("Continue?", &mut input, &mut output).unwrap());
    }
}
