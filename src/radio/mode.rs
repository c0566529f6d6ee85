//! Radio mode state machine
//!
//! `Uninitialized -> Standby <-> Receiving`, with `Sleep` reachable from the two idle
//! states, `Transmitting` entered from `Standby` or `Receiving` and returning to
//! whichever of them it was entered from, and `ChannelSensing` entered from `Standby`
//! only.

/// Radio operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    /// Not yet brought up
    Uninitialized,
    /// Idle, oscillator running
    Standby,
    /// Lowest power mode
    Sleep,
    /// Continuous receive
    Receiving,
    /// Transmission in progress
    Transmitting,
    /// Channel activity detection in progress
    ChannelSensing,
}

/// A transition the state machine refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeError {
    /// Mode at the time of the request
    pub from: RadioMode,
    /// Requested mode
    pub to: RadioMode,
}

/// Check whether the radio may move from `from` to `to` directly
pub fn can_enter(from: RadioMode, to: RadioMode) -> bool {
    use RadioMode::*;
    match (from, to) {
        (Uninitialized, Standby) => true,
        (Uninitialized, _) | (_, Uninitialized) => false,
        (_, Standby) => true,
        (Standby | Receiving | Sleep, Sleep | Receiving) => true,
        (Standby | Receiving, Transmitting) => true,
        (Standby, ChannelSensing) => true,
        _ => false,
    }
}

/// Tracks the current mode and the mode to resume after a transmission
#[derive(Debug, Clone, Copy)]
pub struct ModeMachine {
    current: RadioMode,
    resume: RadioMode,
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeMachine {
    /// Create a state machine for a radio that has not been brought up
    pub const fn new() -> Self {
        Self {
            current: RadioMode::Uninitialized,
            resume: RadioMode::Standby,
        }
    }

    /// Current mode
    pub fn current(&self) -> RadioMode {
        self.current
    }

    /// Whether bring-up has completed
    pub fn is_initialized(&self) -> bool {
        self.current != RadioMode::Uninitialized
    }

    /// Move to `to`, validating the transition
    pub fn enter(&mut self, to: RadioMode) -> Result<(), ModeError> {
        let from = self.current;
        if from == to && to != RadioMode::Transmitting && to != RadioMode::ChannelSensing {
            return Ok(());
        }
        if !can_enter(from, to) {
            return Err(ModeError { from, to });
        }
        if to == RadioMode::Transmitting {
            self.resume = from;
        }
        self.current = to;
        Ok(())
    }

    /// Leave `Transmitting`, returning the mode that was active before it
    pub fn finish_transmit(&mut self) -> RadioMode {
        if self.current == RadioMode::Transmitting {
            self.current = self.resume;
        }
        self.current
    }

    /// Drop back to `Uninitialized` after a failed bring-up
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
