use std::time::{Duration, Instant};

/// When buffered deltas are handed to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Maximum age of the oldest pending delta.
    pub flush_interval: Duration,
    /// Pending size, in chars, above which a push flushes at once.
    pub flush_threshold: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(40),
            flush_threshold: 128,
        }
    }
}

/// Coalesces small deltas so state updates happen at a bounded rate.
#[derive(Debug, Default)]
pub struct DeltaBatcher {
    policy: BatchPolicy,
    pending: String,
    pending_chars: usize,
    deadline: Option<Instant>,
}

impl DeltaBatcher {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Buffer `delta`. Returns the batch if the size threshold was crossed.
    pub fn push(&mut self, delta: &str, now: Instant) -> Option<String> {
        if delta.is_empty() {
            return None;
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.policy.flush_interval);
        }
        self.pending.push_str(delta);
        self.pending_chars += delta.chars().count();
        if self.pending_chars > self.policy.flush_threshold {
            return self.flush();
        }
        None
    }

    /// Returns the batch if its deadline has passed.
    pub fn poll_due(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Take whatever is pending, regardless of age or size.
    pub fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        self.pending_chars = 0;
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
