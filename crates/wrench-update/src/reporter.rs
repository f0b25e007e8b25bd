use std::cell::RefCell;

use anyhow::Result;

/// Operator-facing progress output for a pipeline run.
pub trait Reporter {
    fn phase_started(&self, title: &str);

    fn phase_finished(&self, title: &str);

    fn info(&self, message: &str);

    fn warn(&self, message: &str);
}

/// Operator interaction points the pipeline may block on.
pub trait Prompt {
    /// `Ok(false)` means the operator declined.
    fn confirm(&self, message: &str) -> Result<bool>;

    /// Cancellation window before a costly step; an error aborts the run.
    fn pause(&self, seconds: u64) -> Result<()>;
}

/// Records every line instead of printing it.
#[derive(Debug, Default)]
pub struct HeadlessReporter {
    lines: RefCell<Vec<String>>,
}

impl HeadlessReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter_map(|line| line.strip_prefix("warn: ").map(str::to_string))
            .collect()
    }

    fn record(&self, kind: &str, message: &str) {
        self.lines.borrow_mut().push(format!("{kind}: {message}"));
    }
}

impl Reporter for HeadlessReporter {
    fn phase_started(&self, title: &str) {
        self.record("start", title);
    }

    fn phase_finished(&self, title: &str) {
        self.record("done", title);
    }

    fn info(&self, message: &str) {
        self.record("info", message);
    }

    fn warn(&self, message: &str) {
        self.record("warn", message);
    }
}

/// Answers every confirmation the same way and never sleeps.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answer: bool,
    confirmations: RefCell<Vec<String>>,
    pauses: RefCell<Vec<u64>>,
}

impl ScriptedPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            ..Self::default()
        }
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.borrow().clone()
    }

    pub fn pauses(&self) -> Vec<u64> {
        self.pauses.borrow().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        self.confirmations.borrow_mut().push(message.to_string());
        Ok(self.answer)
    }

    fn pause(&self, seconds: u64) -> Result<()> {
        self.pauses.borrow_mut().push(seconds);
        Ok(())
    }
}
