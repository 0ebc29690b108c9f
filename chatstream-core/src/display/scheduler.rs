use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// What to do when the target grows after a typing session has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterComplete {
    /// Ignore the growth unless nothing is displayed yet (a fresh message).
    #[default]
    Hold,
    /// Start a new typing session from the current cursor.
    Resume,
    /// Show the grown target at once.
    Snap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealConfig {
    /// Minimum time between two revealed characters.
    pub reveal_interval: Duration,
    /// How often a driver re-checks the clock. Should be below `reveal_interval`.
    pub check_interval: Duration,
    pub after_complete: AfterComplete,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            reveal_interval: Duration::from_millis(20),
            check_interval: Duration::from_millis(10),
            after_complete: AfterComplete::Hold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    Idle,
    Typing,
    Completed,
}

/// Result of one [`RevealScheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not typing; nothing to do.
    Inactive,
    /// Typing, but the interval has not elapsed yet.
    Waiting,
    /// One character was revealed.
    Revealed,
    /// The cursor reached the end of the target. Reported once per session.
    Completed,
}

/// Paced character reveal of a target string.
///
/// The displayed text is always a prefix of the target, so the cursor is
/// simply `displayed.len()`. Time is passed in by the caller, which keeps the
/// state machine deterministic; [`super::RevealTask`] drives it on tokio.
#[derive(Debug, Clone)]
pub struct RevealScheduler {
    config: RevealConfig,
    target: String,
    displayed: String,
    state: RevealState,
    last_reveal: Option<Instant>,
    completion_reported: bool,
}

impl RevealScheduler {
    pub fn new(config: RevealConfig) -> Self {
        Self {
            config,
            target: String::new(),
            displayed: String::new(),
            state: RevealState::Idle,
            last_reveal: None,
            completion_reported: false,
        }
    }

    pub fn config(&self) -> &RevealConfig {
        &self.config
    }

    pub fn state(&self) -> RevealState {
        self.state
    }

    pub fn is_typing(&self) -> bool {
        self.state == RevealState::Typing
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Byte offset into the target of the next character to reveal.
    pub fn cursor(&self) -> usize {
        self.displayed.len()
    }

    /// Supply the current target text. Call whenever it changes.
    pub fn set_target(&mut self, target: &str, now: Instant) {
        if target == self.target {
            return;
        }
        self.target.clear();
        self.target.push_str(target);

        if !self.target.starts_with(&self.displayed) {
            if self.target.len() < self.displayed.len() {
                // shrunk or reset: no backwards animation
                self.snap_to_target();
                return;
            }
            // replaced by a longer, unrelated text: a new message
            self.displayed.clear();
            self.state = RevealState::Idle;
            self.last_reveal = None;
        }

        match self.state {
            RevealState::Idle => {
                if !self.target.is_empty() {
                    self.start(now);
                }
            }
            // the running session picks up the new characters
            RevealState::Typing => {}
            RevealState::Completed => {
                if self.displayed.len() < self.target.len() {
                    match self.config.after_complete {
                        AfterComplete::Hold => {
                            if self.displayed.is_empty() {
                                self.start(now);
                            }
                        }
                        AfterComplete::Resume => self.start(now),
                        AfterComplete::Snap => {
                            self.displayed.clear();
                            self.displayed.push_str(&self.target);
                        }
                    }
                }
            }
        }
    }

    /// Advance by at most one character if the reveal interval has elapsed.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.state != RevealState::Typing {
            return TickOutcome::Inactive;
        }

        let mut revealed = false;
        let last = self.last_reveal.unwrap_or(now);
        let interval = self.config.reveal_interval;
        if now.saturating_duration_since(last) >= interval {
            let next = self
                .target
                .get(self.displayed.len()..)
                .and_then(|rest| rest.chars().next());
            if let Some(ch) = next {
                self.displayed.push(ch);
                // pace from the due time so late ticks do not accumulate drift,
                // but never owe more than one interval
                let due = last + interval;
                self.last_reveal = Some(if now.saturating_duration_since(due) < interval {
                    due
                } else {
                    now
                });
                revealed = true;
            }
        }

        if self.displayed.len() >= self.target.len() {
            self.state = RevealState::Completed;
            self.last_reveal = None;
            if !self.completion_reported {
                self.completion_reported = true;
                return TickOutcome::Completed;
            }
            return TickOutcome::Inactive;
        }

        if revealed {
            TickOutcome::Revealed
        } else {
            TickOutcome::Waiting
        }
    }

    /// Show the full current target immediately and stop.
    /// Returns true if this ended a session whose completion was not yet reported.
    pub fn force_complete(&mut self) -> bool {
        self.displayed.clear();
        self.displayed.push_str(&self.target);
        self.last_reveal = None;
        if self.target.is_empty() {
            self.state = RevealState::Idle;
            return false;
        }
        self.state = RevealState::Completed;
        if self.completion_reported {
            return false;
        }
        self.completion_reported = true;
        true
    }

    /// Earliest instant at which the next character may appear.
    pub fn next_due(&self) -> Option<Instant> {
        match (self.state, self.last_reveal) {
            (RevealState::Typing, Some(last)) => Some(last + self.config.reveal_interval),
            _ => None,
        }
    }

    fn start(&mut self, now: Instant) {
        self.state = RevealState::Typing;
        self.last_reveal = Some(now);
        self.completion_reported = false;
    }

    fn snap_to_target(&mut self) {
        self.displayed.clear();
        self.displayed.push_str(&self.target);
        self.last_reveal = None;
        self.state = if self.target.is_empty() {
            RevealState::Idle
        } else {
            RevealState::Completed
        };
    }
}

impl Default for RevealScheduler {
    fn default() -> Self {
        Self::new(RevealConfig::default())
    }
}
