//! State machine types and validation for xtk.
//!
//! This module formalizes the state machines of the toolkit core:
//! - Grab phases per display
//! - Toplevel window-manager states
//!
//! The state validator checks invariants that should always hold.

use serde::{Deserialize, Serialize};

/// Grab state machine, one per display
///
/// ```text
/// Event\State   U   B   G   GB
/// FirstPress    B   B   GB  GB
/// Press         B   B   G   GB
/// Release       U   B   G   GB
/// LastRelease   U   U   G   G
/// Grab          G   G   G   G
/// Ungrab        U   B   U   U
/// ```
///
/// | State | grab window | restrict window | captured |
/// |-------|-------------|-----------------|----------|
/// | U     | none        | none            | no       |
/// | B     | none        | set             | yes      |
/// | G     | set         | none            | button down or global |
/// | GB    | set         | set             | yes      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrabPhase {
    Ungrabbed,
    Button,
    Grabbed,
    GrabAndButton,
}

/// Toplevel state as requested from the window manager
///
/// ```text
///  ┌──────────────┐  first map   ┌────────┐
///  │ NeverMapped  │─────────────►│ Normal │◄────┐
///  └──────────────┘              └───┬────┘     │ deiconify
///                          withdraw  │  iconify │
///                        ┌───────────┴───────┐  │
///                        ▼                   ▼  │
///                  ┌───────────┐        ┌────────┐
///                  │ Withdrawn │───────►│ Iconic │
///                  └───────────┘iconify └────────┘
/// ```
///
/// `NeverMapped` is tracked as a WM flag; the in-flight sub-states
/// (about-to-map, sync/move/update pending) are flags too, not states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WmState {
    Normal,
    Iconic,
    Withdrawn,
}

impl WmState {
    pub fn name(self) -> &'static str {
        match self {
            WmState::Normal => "normal",
            WmState::Iconic => "iconic",
            WmState::Withdrawn => "withdrawn",
        }
    }
}

/// State violations that can be detected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StateViolation {
    pub kind: ViolationKind,
    pub description: String,
}

/// Types of state violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Grab phase disagrees with the grab/restrict/capture variables
    GrabInvariant,
    /// X id table points at a window that no longer exists or has another id
    StaleIdEntry,
    /// Path table points at a window with a different name or app
    StalePathEntry,
    /// Toplevel without window-manager info
    MissingWmInfo,
    /// Transient count disagrees with the masters recorded by transients
    TransientCount,
    /// A half-dead window outlived its destruction
    HalfDeadLeaked,
}

/// State transition events that can be traced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum StateTransition {
    GrabChanged {
        from: GrabPhase,
        to: GrabPhase,
        window: Option<u32>,
    },
    WmStateChanged {
        window: u32,
        from: WmState,
        to: WmState,
    },
    ConfigureRequested {
        window: u32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        moved: bool,
    },
    WaitTimedOut {
        window: u32,
        waiting_for: String,
    },
    Reparented {
        window: u32,
        frame: Option<u32>,
    },
    WindowDestroyed {
        window: Option<u32>,
        path: Option<String>,
    },
    SendCompleted {
        target: String,
        code: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_phase_serialization() {
        let json = serde_json::to_string(&GrabPhase::GrabAndButton).unwrap();
        assert_eq!(json, "\"grab_and_button\"");
        let parsed: GrabPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, GrabPhase::GrabAndButton);
    }

    #[test]
    fn test_state_transition_serialization() {
        let transition = StateTransition::WmStateChanged {
            window: 42,
            from: WmState::Normal,
            to: WmState::Withdrawn,
        };
        let json = serde_json::to_string(&transition).unwrap();
        assert!(json.contains("wm_state_changed"));
        assert!(json.contains("withdrawn"));
    }

    #[test]
    fn test_wm_state_names() {
        assert_eq!(WmState::Iconic.name(), "iconic");
        assert_eq!(WmState::Withdrawn.name(), "withdrawn");
    }
}
