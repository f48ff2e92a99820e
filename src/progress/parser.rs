//! Stateful interpretation of raw output chunks

use super::grammar::{Marker, OutputGrammar, SteamCmdGrammar};
use crate::process::MAX_LINE_LEN;
use crate::types::{ByteProgress, InputPrompt, Phase, ProgressSnapshot, TaskState};
use std::sync::Arc;

/// Turns raw output chunks into [`ProgressSnapshot`]s
///
/// Chunks may split lines anywhere; partial lines are buffered until their
/// terminator arrives or they reach [`MAX_LINE_LEN`]. An unterminated
/// fragment matching an input prompt is consumed immediately (the tool does
/// not print a newline after `password:`).
///
/// Percent never decreases and, once a terminal state is reached, the
/// parser ignores everything else it is fed.
pub struct ProgressParser {
    grammar: Arc<dyn OutputGrammar>,
    pending: String,
    percent: f64,
    phase: Phase,
    state: TaskState,
    message: String,
    prompt: Option<InputPrompt>,
    bytes: Option<ByteProgress>,
    logged_in: bool,
}

impl std::fmt::Debug for ProgressParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressParser")
            .field("percent", &self.percent)
            .field("phase", &self.phase)
            .field("state", &self.state)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    /// Parser using the built-in SteamCMD grammar
    pub fn new() -> Self {
        Self::with_grammar(Arc::new(SteamCmdGrammar::new()))
    }

    /// Parser using a custom grammar
    pub fn with_grammar(grammar: Arc<dyn OutputGrammar>) -> Self {
        Self {
            grammar,
            pending: String::new(),
            percent: 0.0,
            phase: Phase::Starting,
            state: TaskState::Running,
            message: "Starting SteamCMD".to_string(),
            prompt: None,
            bytes: None,
            logged_in: false,
        }
    }

    /// Feed a chunk of output.
    ///
    /// Returns a new snapshot when the chunk changed anything, `None` for an
    /// empty chunk, a chunk that only extended a partial line, or any chunk
    /// after the parser became terminal.
    pub fn feed(&mut self, chunk: &str) -> Option<ProgressSnapshot> {
        if chunk.is_empty() || self.is_terminal() {
            return None;
        }

        let mut changed = false;
        for ch in chunk.chars() {
            match ch {
                '\n' | '\r' => changed |= self.complete_line(),
                _ => {
                    self.pending.push(ch);
                    if self.pending.len() >= MAX_LINE_LEN {
                        changed |= self.complete_line();
                    }
                }
            }
        }

        if !self.is_terminal()
            && !self.pending.trim().is_empty()
            && let Some(prompt) = self.grammar.detect_prompt(&self.pending)
        {
            self.message = std::mem::take(&mut self.pending).trim().to_string();
            self.enter_prompt(prompt);
            changed = true;
        }

        changed.then(|| self.snapshot())
    }

    /// Flush a trailing unterminated line once the process has exited
    pub fn finish(&mut self) -> Option<ProgressSnapshot> {
        if self.is_terminal() {
            return None;
        }
        self.complete_line().then(|| self.snapshot())
    }

    /// Current state without feeding anything
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.percent,
            phase: self.phase,
            state: self.state,
            message: self.message.clone(),
            prompt: self.prompt,
            bytes: self.bytes,
        }
    }

    /// Whether a terminal state was reached
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the tool reported a completed login
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// The pending prompt was answered; return to the login phase
    pub fn resume_after_input(&mut self) {
        if self.is_terminal() || self.prompt.is_none() {
            return;
        }
        self.prompt = None;
        if self.phase == Phase::AwaitingInput {
            self.phase = Phase::LoggingIn;
        }
    }

    /// Move to a non-terminal phase chosen by the caller (e.g. on launch)
    pub fn set_phase(&mut self, phase: Phase, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.phase = phase;
        self.message = message.into();
    }

    /// Conclude the task from outside the output stream (exit code, cancel,
    /// launch failure). No-op when already terminal; returns whether the
    /// state changed.
    pub fn conclude(&mut self, state: TaskState, message: impl Into<String>) -> bool {
        if self.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.phase = Phase::Finished;
        self.prompt = None;
        self.message = message.into();
        if state == TaskState::Succeeded {
            self.percent = 100.0;
        }
        true
    }

    fn complete_line(&mut self) -> bool {
        let line = std::mem::take(&mut self.pending);
        let line = line.trim();
        if line.is_empty() || self.is_terminal() {
            return false;
        }
        self.message = line.to_string();

        match self.grammar.classify(line) {
            None | Some(Marker::Bootstrap) => {}
            Some(Marker::LoggingIn) => {
                if matches!(self.phase, Phase::Starting | Phase::Installing) {
                    self.phase = Phase::LoggingIn;
                }
            }
            Some(Marker::LoggedIn) => {
                self.logged_in = true;
                self.prompt = None;
                if matches!(
                    self.phase,
                    Phase::Starting | Phase::LoggingIn | Phase::AwaitingInput
                ) {
                    self.phase = Phase::Downloading;
                }
            }
            Some(Marker::Prompt(prompt)) => self.enter_prompt(prompt),
            Some(Marker::Progress {
                percent,
                phase,
                bytes,
            }) => {
                self.percent = self.percent.max(percent.clamp(0.0, 100.0));
                self.phase = phase;
                self.prompt = None;
                if bytes.is_some() {
                    self.bytes = bytes;
                }
            }
            Some(Marker::Success) => {
                self.conclude(TaskState::Succeeded, line);
            }
            Some(Marker::Failure) => {
                self.conclude(TaskState::Failed, line);
            }
        }
        true
    }

    fn enter_prompt(&mut self, prompt: InputPrompt) {
        self.prompt = Some(prompt);
        self.phase = Phase::AwaitingInput;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_lines_advance_progress() {
        let mut parser = ProgressParser::new();
        let snapshot = parser.feed("Downloading...10%\n").unwrap();
        assert_eq!(snapshot.percent, 10.0);
        assert_eq!(snapshot.phase, Phase::Downloading);
        assert_eq!(snapshot.state, TaskState::Running);
        assert_eq!(snapshot.message, "Downloading...10%");
    }

    #[test]
    fn split_lines_are_reassembled() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed("Downloa").is_none());
        let snapshot = parser.feed("ding...42%\r\n").unwrap();
        assert_eq!(snapshot.percent, 42.0);
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed("").is_none());
        assert_eq!(parser.snapshot().percent, 0.0);
    }

    #[test]
    fn percent_never_decreases_across_stages() {
        let mut parser = ProgressParser::new();
        parser.feed(" Update state (0x61) downloading, progress: 80.00 (80 / 100)\n");
        let snapshot = parser
            .feed(" Update state (0x5) verifying install, progress: 5.00 (5 / 100)\n")
            .unwrap();
        assert_eq!(snapshot.percent, 80.0);
        assert_eq!(snapshot.phase, Phase::Verifying);
    }

    #[test]
    fn percent_is_monotonic_for_arbitrary_chunking() {
        let output = "Downloading...10%\nDownloading...55%\nDownloading...30%\n\
                      Update state (0x61) downloading, progress: 70.5 (7 / 10)\n\
                      [ 99%] Downloading update\nDownloading...90%\n";
        // small deterministic LCG for chunk boundaries
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..200 {
            let mut parser = ProgressParser::new();
            let mut last = 0.0;
            let mut rest = output;
            while !rest.is_empty() {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let mut cut = ((seed >> 16) as usize % 9 + 1).min(rest.len());
                while !rest.is_char_boundary(cut) {
                    cut += 1;
                }
                let (chunk, tail) = rest.split_at(cut);
                rest = tail;
                if let Some(snapshot) = parser.feed(chunk) {
                    assert!(snapshot.percent >= last);
                    assert!((0.0..=100.0).contains(&snapshot.percent));
                    last = snapshot.percent;
                }
            }
            assert_eq!(parser.snapshot().percent, 90.0);
        }
    }

    #[test]
    fn success_forces_full_progress() {
        let mut parser = ProgressParser::new();
        parser.feed("Downloading...10%\nDownloading...55%\n");
        let snapshot = parser.feed("Success! App '480' fully installed.\n").unwrap();
        assert_eq!(snapshot.state, TaskState::Succeeded);
        assert_eq!(snapshot.percent, 100.0);
        assert_eq!(snapshot.phase, Phase::Finished);
    }

    #[test]
    fn failure_is_terminal_and_keeps_percent() {
        let mut parser = ProgressParser::new();
        parser.feed("Downloading...30%\n");
        let snapshot = parser.feed("ERROR! Failed to install app '480'\n").unwrap();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.percent, 30.0);
        assert_eq!(snapshot.message, "ERROR! Failed to install app '480'");
    }

    #[test]
    fn terminal_state_is_final() {
        let mut parser = ProgressParser::new();
        parser.feed("Login Failure: Invalid Password\n");
        assert!(parser.feed("Success\n").is_none());
        assert!(parser.feed("Downloading...90%\n").is_none());
        assert!(!parser.conclude(TaskState::Succeeded, "exit 0"));
        let snapshot = parser.snapshot();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.message, "Login Failure: Invalid Password");
    }

    #[test]
    fn unrecognized_lines_only_update_message() {
        let mut parser = ProgressParser::new();
        parser.feed("Downloading...20%\n");
        let snapshot = parser.feed("Loading Steam API...OK\n").unwrap();
        assert_eq!(snapshot.percent, 20.0);
        assert_eq!(snapshot.phase, Phase::Downloading);
        assert_eq!(snapshot.message, "Loading Steam API...OK");
    }

    #[test]
    fn bootstrap_update_does_not_move_percent() {
        let mut parser = ProgressParser::new();
        let snapshot = parser.feed("[ 45%] Downloading update (1 of 2 KB)...\n").unwrap();
        assert_eq!(snapshot.percent, 0.0);
        assert_eq!(snapshot.phase, Phase::Starting);
    }

    #[test]
    fn unterminated_prompt_is_detected() {
        let mut parser = ProgressParser::new();
        parser.feed("Logging in user 'gaben' to Steam Public...\n");
        let snapshot = parser.feed("Steam Guard code:").unwrap();
        assert_eq!(snapshot.phase, Phase::AwaitingInput);
        assert_eq!(snapshot.prompt, Some(InputPrompt::GuardCode));

        parser.resume_after_input();
        let snapshot = parser.snapshot();
        assert_eq!(snapshot.phase, Phase::LoggingIn);
        assert_eq!(snapshot.prompt, None);

        let snapshot = parser.feed("Waiting for user info...OK\n").unwrap();
        assert!(parser.is_logged_in());
        assert_eq!(snapshot.phase, Phase::Downloading);
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed("Success! App '480' fully installed.").is_none());
        let snapshot = parser.finish().unwrap();
        assert!(snapshot.is_success());
    }

    #[test]
    fn conclude_sets_terminal_state_once() {
        let mut parser = ProgressParser::new();
        parser.feed("Downloading...40%\n");
        assert!(parser.conclude(TaskState::Cancelled, "Cancelled"));
        assert!(!parser.conclude(TaskState::Failed, "late"));
        let snapshot = parser.snapshot();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert_eq!(snapshot.percent, 40.0);
    }

    #[test]
    fn unterminated_output_is_bounded() {
        let mut parser = ProgressParser::new();
        parser.feed(&"#".repeat(MAX_LINE_LEN * 2 + 1));
        assert!(parser.pending.len() < MAX_LINE_LEN);

        let snapshot = parser.feed("\nDownloading...12%\n").unwrap();
        assert_eq!(snapshot.percent, 12.0);
    }
}
