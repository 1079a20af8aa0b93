use std::time::Duration;
use tokio::time::Instant;

/// How long the screen stays on after the most recent trigger
#[derive(Debug, Clone)]
pub struct ActivationWindow {
    period: Duration,
    deadline: Option<Instant>,
}

impl ActivationWindow {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    /// Push the deadline out; returns true if the window was closed before
    pub fn activate(&mut self, now: Instant) -> bool {
        let was_active = self.is_active(now);
        let deadline = now + self.period;
        self.deadline = Some(match self.deadline {
            Some(current) if was_active && current > deadline => current,
            _ => deadline,
        });
        !was_active
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |deadline| now < deadline)
    }

    /// Close the window once the deadline has passed; true on that transition
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
