//! EtherCAT Application-Layer (AL) state machine types.
//!
//! Slaves progress through INIT → PRE_OP → SAFE_OP → OP. BOOT is
//! encoded for completeness but never entered by the simulated ESC.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Acknowledge / error-indication bit in AL control and AL status.
pub const AL_ACK_BIT: u8 = 0x10;

/// Mask selecting the requested state in an AL control word.
pub const AL_STATE_MASK: u16 = 0x000F;

/// AL status codes reported in register 0x0134.
pub mod status_code {
    /// No error.
    pub const NONE: u16 = 0x0000;
    /// Requested transition is not in the transition matrix.
    pub const INVALID_TRANSITION: u16 = 0x0001;
    /// SAFE_OP/OP requested before the input PDOs were mapped.
    pub const INPUTS_NOT_MAPPED: u16 = 0x0011;
    /// Bootstrap state requested.
    pub const BOOT_NOT_SUPPORTED: u16 = 0x0043;
}

/// AL states as encoded in the AL control and AL status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AlState {
    /// Power-on state; only EEPROM and mailbox setup possible.
    #[default]
    Init = 0x01,
    /// Mailbox communication enabled.
    PreOp = 0x02,
    /// Firmware update state.
    Boot = 0x03,
    /// Inputs valid, outputs held safe.
    SafeOp = 0x04,
    /// Full cyclic process data exchange.
    Op = 0x08,
}

impl fmt::Display for AlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::PreOp => write!(f, "PRE_OP"),
            Self::Boot => write!(f, "BOOT"),
            Self::SafeOp => write!(f, "SAFE_OP"),
            Self::Op => write!(f, "OP"),
        }
    }
}

impl AlState {
    /// Decode the low nibble of an AL control/status value.
    ///
    /// Returns `None` for codes that do not name a state (including 0).
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            0x01 => Some(Self::Init),
            0x02 => Some(Self::PreOp),
            0x03 => Some(Self::Boot),
            0x04 => Some(Self::SafeOp),
            0x08 => Some(Self::Op),
            _ => None,
        }
    }

    /// Register encoding of this state.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Position in the INIT < PRE_OP < SAFE_OP < OP ordering; BOOT ranks 0.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Boot => 0,
            Self::Init => 1,
            Self::PreOp => 2,
            Self::SafeOp => 3,
            Self::Op => 4,
        }
    }

    /// Check if a transition to `target` is allowed by the ESC transition matrix.
    #[must_use]
    pub fn can_transition_to(self, target: AlState) -> bool {
        use AlState::{Init, Op, PreOp, SafeOp};

        matches!(
            (self, target),
            (Init, Init | PreOp)
                | (PreOp, Init | PreOp | SafeOp)
                | (SafeOp, Init | PreOp | SafeOp | Op)
                | (Op, Init | SafeOp | Op)
        )
    }

    /// Returns true if entering this state requires mapped process data.
    #[must_use]
    pub fn requires_process_data(self) -> bool {
        matches!(self, Self::SafeOp | Self::Op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_round_trip() {
        for state in [
            AlState::Init,
            AlState::PreOp,
            AlState::Boot,
            AlState::SafeOp,
            AlState::Op,
        ] {
            assert_eq!(AlState::from_code(state.code()), Some(state));
        }
        assert_eq!(AlState::from_code(0), None);
        assert_eq!(AlState::from_code(0x05), None);
    }

    #[test]
    fn test_ack_bit_ignored_when_decoding() {
        assert_eq!(AlState::from_code(0x12), Some(AlState::PreOp));
    }

    #[test]
    fn test_ranks() {
        assert!(AlState::Init.rank() < AlState::PreOp.rank());
        assert!(AlState::PreOp.rank() < AlState::SafeOp.rank());
        assert!(AlState::SafeOp.rank() < AlState::Op.rank());
        assert_eq!(AlState::Boot.rank(), 0);
    }

    #[test]
    fn test_transition_matrix() {
        assert!(AlState::Init.can_transition_to(AlState::PreOp));
        assert!(!AlState::Init.can_transition_to(AlState::SafeOp));
        assert!(!AlState::Init.can_transition_to(AlState::Op));
        assert!(AlState::PreOp.can_transition_to(AlState::SafeOp));
        assert!(!AlState::PreOp.can_transition_to(AlState::Op));
        assert!(AlState::SafeOp.can_transition_to(AlState::Op));
        assert!(AlState::Op.can_transition_to(AlState::Init));
        assert!(!AlState::Op.can_transition_to(AlState::PreOp));
        assert!(!AlState::PreOp.can_transition_to(AlState::Boot));
        assert!(!AlState::Boot.can_transition_to(AlState::Init));
    }

    #[test]
    fn test_display() {
        assert_eq!(AlState::PreOp.to_string(), "PRE_OP");
        assert_eq!(AlState::SafeOp.to_string(), "SAFE_OP");
        assert_eq!(AlState::Op.to_string(), "OP");
    }
}
