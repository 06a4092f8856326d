use crate::packet::StateSignal;

/// Queue-wide aggregates of packet state. Every change is reported to the application exactly
///  once, so these are the 'previous' values that edges are detected against.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RuntimeFlags {
    pub ui_blocked: bool,
    pub sending: bool,
    pub suspended: bool,
}

/// The flag changes that need to be reported, `None` meaning 'no change'
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FlagEdges {
    pub sending: Option<bool>,
    pub ui_blocked: Option<bool>,
}

impl RuntimeFlags {
    /// after a scheduler tick: 'sending' if the tick started sending something, or anything
    ///  is still underway
    pub fn apply_tick(&mut self, signal: StateSignal, any_active: bool, should_block_ui: bool) -> FlagEdges {
        let sending = signal.sending == Some(true) || any_active;
        FlagEdges {
            sending: Self::update(&mut self.sending, sending),
            ui_blocked: Self::update(&mut self.ui_blocked, should_block_ui),
        }
    }

    /// Braking can only move the flags towards idle, releasing only towards active - and only
    ///  if the packets touched by the brake actually contribute to the flag.
    pub fn apply_brake(&mut self, releasing: bool, any_active: bool, should_block_ui: bool) -> FlagEdges {
        let mut edges = FlagEdges::default();
        if any_active {
            edges.sending = Self::update(&mut self.sending, releasing);
        }
        if should_block_ui {
            edges.ui_blocked = Self::update(&mut self.ui_blocked, releasing);
        }
        edges
    }

    fn update(flag: &mut bool, value: bool) -> Option<bool> {
        if *flag == value {
            return None;
        }
        *flag = value;
        Some(value)
    }
}
