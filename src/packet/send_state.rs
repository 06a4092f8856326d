use std::fmt::{Display, Formatter};

/// The lifecycle of a single packet: `New -> Queued -> Sending -> ReplyWait`, ending in one of
///  the terminal states `Completed`, `Failed` or `TimedOut`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum SendState {
    #[default]
    New,
    Queued,
    Sending,
    ReplyWait,
    Completed,
    Failed,
    TimedOut,
}
impl SendState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Completed | SendState::Failed | SendState::TimedOut)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SendState::Sending | SendState::ReplyWait)
    }
}

impl Display for SendState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SendState::New => "new",
            SendState::Queued => "queued",
            SendState::Sending => "sending",
            SendState::ReplyWait => "replywait",
            SendState::Completed => "completed",
            SendState::Failed => "failed",
            SendState::TimedOut => "timeout",
        };
        f.write_str(s)
    }
}

/// The result of a state transition, reporting how the packet's contribution to the queue's
///  aggregate flags changed. Each slot is tri-valued: `Some(true)`, `Some(false)` or `None` for
///  'unchanged'.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StateSignal {
    pub sending: Option<bool>,
    pub completed: Option<bool>,
    pub failed: Option<bool>,
}
impl StateSignal {
    pub const UNCHANGED: StateSignal = StateSignal { sending: None, completed: None, failed: None };

    pub const fn new(sending: Option<bool>, completed: Option<bool>, failed: Option<bool>) -> StateSignal {
        StateSignal { sending, completed, failed }
    }

    /// last-non-unchanged-wins, slot by slot
    pub fn merge(&mut self, next: StateSignal) {
        if next.sending.is_some() {
            self.sending = next.sending;
        }
        if next.completed.is_some() {
            self.completed = next.completed;
        }
        if next.failed.is_some() {
            self.failed = next.failed;
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed == Some(true)
    }

    pub fn is_failed(&self) -> bool {
        self.failed == Some(true)
    }
}
