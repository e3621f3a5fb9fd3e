use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Mutex;

/// Source of answers for interactive confirmations.
pub trait Prompter: Send + Sync {
    fn ask(&self, question: &str) -> anyhow::Result<String>;
}

/// Reads answers from the terminal.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&self, question: &str) -> anyhow::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{} ", question)?;
        stderr.flush()?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(anyhow::anyhow!("No input available for confirmation"));
        }
        Ok(line.trim().to_string())
    }
}

/// Replays canned answers in order. Running out of answers is an error.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str) -> anyhow::Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.to_string());
        }
        self.answers
            .lock()
            .map_err(|_| anyhow::anyhow!("prompt state poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("No scripted answer for: {}", question))
    }
}

/// Ask `question` and require the exact `expected` answer.
pub fn confirm_exact(prompter: &dyn Prompter, question: &str, expected: &str) -> anyhow::Result<bool> {
    let answer = prompter.ask(question)?;
    Ok(answer == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_in_order() {
        let prompter = ScriptedPrompter::new(["yes", "dev"]);
        assert!(confirm_exact(&prompter, "Continue?", "yes").unwrap());
        assert!(!confirm_exact(&prompter, "Environment?", "prod").unwrap());
        assert!(prompter.ask("again?").is_err());
        assert_eq!(prompter.questions().len(), 3);
    }
}
