use std::time::Duration;
use tokio::time::Instant;

/// Result of feeding the window a trigger or a clock reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTransition {
    /// Idle -> Recording
    Started { deadline: Instant },
    /// Recording -> Recording with a deadline at least as late as before
    Extended { deadline: Instant },
    /// Recording -> Idle
    Expired { started_at: Instant, deadline: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Idle,
    Recording { started_at: Instant, deadline: Instant },
}

/// Idle/Recording state machine with an extendable postroll deadline.
///
/// Pure: callers supply the clock. Poll before triggering so that a trigger
/// arriving after the deadline starts a new recording instead of reviving
/// the expired one.
#[derive(Debug, Clone)]
pub struct RecordingWindow {
    postroll: Duration,
    state: WindowState,
}

impl RecordingWindow {
    pub fn new(postroll: Duration) -> Self {
        Self {
            postroll,
            state: WindowState::Idle,
        }
    }

    pub fn trigger(&mut self, now: Instant) -> WindowTransition {
        let requested = now + self.postroll;
        match self.state {
            WindowState::Idle => {
                self.state = WindowState::Recording {
                    started_at: now,
                    deadline: requested,
                };
                WindowTransition::Started {
                    deadline: requested,
                }
            }
            WindowState::Recording {
                started_at,
                deadline,
            } => {
                let deadline = deadline.max(requested);
                self.state = WindowState::Recording {
                    started_at,
                    deadline,
                };
                WindowTransition::Extended { deadline }
            }
        }
    }

    /// Close the window once `now` reaches the deadline
    pub fn poll(&mut self, now: Instant) -> Option<WindowTransition> {
        match self.state {
            WindowState::Recording {
                started_at,
                deadline,
            } if now >= deadline => {
                self.state = WindowState::Idle;
                Some(WindowTransition::Expired {
                    started_at,
                    deadline,
                })
            }
            _ => None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, WindowState::Recording { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            WindowState::Recording { deadline, .. } => Some(deadline),
            WindowState::Idle => None,
        }
    }

    pub fn started_at(&self) -> Option<Instant> {
        match self.state {
            WindowState::Recording { started_at, .. } => Some(started_at),
            WindowState::Idle => None,
        }
    }

    pub fn postroll(&self) -> Duration {
        self.postroll
    }
}
