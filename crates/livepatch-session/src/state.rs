//! Session lifecycle states.

use std::fmt;

/// Lifecycle of the single session a manager owns.
///
/// ```text
/// Idle ──connect──▶ Attaching ──ok──▶ Attached
///  ▲                   │                 │
///  │                 fail/close      lost/close
///  │                   ▼                 │
///  └──── released ── Closing ◀───────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session and no attempt in flight.
    #[default]
    Idle,
    /// Probe/attach/enable sequence in flight.
    Attaching,
    /// Session live and routing events.
    Attached,
    /// Resources being released.
    Closing,
}

/// A transition the table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    /// Whether `self -> to` is a legal move.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Attaching)
                | (Self::Attaching, Self::Attached | Self::Closing)
                | (Self::Attached | Self::Closing, Self::Closing)
                | (Self::Closing, Self::Idle)
        )
    }

    /// Move to `to`, failing on an illegal transition.
    ///
    /// # Errors
    /// Returns [`InvalidTransition`] if the table forbids the move.
    pub fn transition(&mut self, to: Self) -> Result<(), InvalidTransition> {
        if self.can_transition(to) {
            *self = to;
            Ok(())
        } else {
            Err(InvalidTransition { from: *self, to })
        }
    }

    /// A session exists or is being attached.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Attaching | Self::Attached)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Closing => "closing",
        })
    }
}
