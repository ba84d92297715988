//! Transition table of the link state machine
//!
//! The link protocol is history-dependent: the same raw event means
//! "bring the link up" right after the cable was unplugged, and "tear down"
//! otherwise. Instead of scattering that across handlers, every
//! `(state, last event, event)` combination maps to one [`Step`] here:
//! the new run state, the new detailed state and the ordered list of
//! [`Action`]s the tracker executes.
//!
//! ```text
//! event              | last == UnpluggedDown          | otherwise
//! -------------------+--------------------------------+------------------------------
//! PluggedUp          | clear, link up, Connecting,    | link up, Connecting,
//!                    | ensure address                 | ensure address
//! Unknown            | Starting: link up, clear,      | Starting: reset, Disconnected
//!                    | Connecting                     |
//! PluggedDown        | Stopped: link up, clear,       | Stopped: reset, Disconnected
//!                    | Connecting                     |
//! UnpluggedUp/Down   | reset, Disconnected            | reset, Disconnected
//! Disabled           | Disconnected                   | Disconnected
//! DriverStarted      | Running (from Starting)        | Running (from Starting)
//! DriverStopped      | reset, Disconnected            | reset, Disconnected
//! Error / DriverHung | reset, Failed                  | reset, Failed
//! AddressingStarted  | ObtainingAddress unless Connected
//! AddressingOk       | store lease, Connected (or "configuration changed")
//! AddressingFailed   | reset, Failed
//! SettingsChanged    | reset, reconfigure (only while Running)
//! ```
//!
//! The table is pure: it never touches the driver, so every combination
//! can be enumerated in tests.

use serde::Serialize;
use std::fmt;

use crate::monitor::LinkEvent;
use crate::state::{DetailedState, RunState};

/// Every kind of input the state machine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// Classified driver event from the link monitor
    Link(LinkEvent),
    /// Explicit administrative disable
    Disabled,
    /// A live dynamic acquisition began
    AddressingStarted,
    /// A live acquisition (dynamic or static) produced a lease
    AddressingSucceeded,
    /// A live acquisition failed
    AddressingFailed,
    /// Static addressing settings changed materially
    SettingsChanged,
}

impl EventKind {
    /// History the machine starts from: the cable is assumed unplugged.
    pub const INITIAL: EventKind = EventKind::Link(LinkEvent::UnpluggedDown);
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Link(event) => write!(f, "{}", event),
            EventKind::Disabled => f.write_str("DISABLED"),
            EventKind::AddressingStarted => f.write_str("ADDRESSING_STARTED"),
            EventKind::AddressingSucceeded => f.write_str("ADDRESSING_SUCCEEDED"),
            EventKind::AddressingFailed => f.write_str("ADDRESSING_FAILED"),
            EventKind::SettingsChanged => f.write_str("SETTINGS_CHANGED"),
        }
    }
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Clear `have_address` and `obtaining_address`
    ClearAddress,
    /// Tell the driver to bring the link up
    LinkUp,
    /// Reset connections; cancels any live addressing attempt
    ResetConnections { disable_interface: bool },
    /// Mark `Connected` if an address is already held, otherwise start
    /// addressing unless an attempt is already in flight
    EnsureAddress,
    /// Start addressing unconditionally
    Reconfigure,
    /// Store the acquired lease and set `have_address`
    StoreLease,
    /// Emit the narrow "configuration changed" notification
    ConfigurationChanged,
}

/// State variables the table is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    pub run_state: RunState,
    pub detailed_state: DetailedState,
    pub have_address: bool,
    pub obtaining_address: bool,
    pub last_event: EventKind,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            run_state: RunState::Starting,
            detailed_state: DetailedState::Disconnected,
            have_address: false,
            obtaining_address: false,
            last_event: EventKind::INITIAL,
        }
    }
}

/// Outcome of evaluating one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub run_state: Option<RunState>,
    pub detailed_state: Option<DetailedState>,
    pub actions: &'static [Action],
}

impl Step {
    const fn new(
        run_state: Option<RunState>,
        detailed_state: Option<DetailedState>,
        actions: &'static [Action],
    ) -> Self {
        Self {
            run_state,
            detailed_state,
            actions,
        }
    }
}

const RESET: &[Action] = &[Action::ResetConnections {
    disable_interface: false,
}];
const BRING_UP: &[Action] = &[Action::LinkUp, Action::ClearAddress];

const TEAR_DOWN: Step = Step::new(
    Some(RunState::Stopped),
    Some(DetailedState::Disconnected),
    RESET,
);
const FAIL: Step = Step::new(Some(RunState::Stopped), Some(DetailedState::Failed), RESET);
const NOTHING: Step = Step::new(None, None, &[]);

/// Evaluate `event` against `state`
pub fn transition(state: &MachineState, event: EventKind) -> Step {
    let after_unplug = state.last_event == EventKind::INITIAL;

    match event {
        EventKind::Link(LinkEvent::PluggedUp) => {
            let actions: &'static [Action] = if after_unplug {
                &[Action::ClearAddress, Action::LinkUp, Action::EnsureAddress]
            } else {
                &[Action::LinkUp, Action::EnsureAddress]
            };
            Step::new(
                Some(RunState::Running),
                Some(DetailedState::Connecting),
                actions,
            )
        }

        EventKind::Link(LinkEvent::Unknown) => {
            if after_unplug {
                Step::new(
                    Some(RunState::Starting),
                    Some(DetailedState::Connecting),
                    BRING_UP,
                )
            } else {
                Step::new(
                    Some(RunState::Starting),
                    Some(DetailedState::Disconnected),
                    RESET,
                )
            }
        }

        EventKind::Link(LinkEvent::PluggedDown) => {
            if after_unplug {
                Step::new(
                    Some(RunState::Stopped),
                    Some(DetailedState::Connecting),
                    BRING_UP,
                )
            } else {
                TEAR_DOWN
            }
        }

        EventKind::Link(LinkEvent::UnpluggedUp | LinkEvent::UnpluggedDown) => TEAR_DOWN,

        EventKind::Disabled => Step::new(
            Some(RunState::Stopped),
            Some(DetailedState::Disconnected),
            &[],
        ),

        EventKind::Link(LinkEvent::DriverStarted) => {
            if state.run_state == RunState::Starting {
                Step::new(Some(RunState::Running), None, &[])
            } else {
                NOTHING
            }
        }

        EventKind::Link(LinkEvent::DriverStopped) => TEAR_DOWN,

        EventKind::Link(LinkEvent::Error | LinkEvent::DriverHung)
        | EventKind::AddressingFailed => FAIL,

        EventKind::AddressingStarted => {
            if state.detailed_state == DetailedState::Connected {
                NOTHING
            } else {
                Step::new(None, Some(DetailedState::ObtainingAddress), &[])
            }
        }

        EventKind::AddressingSucceeded => {
            if state.detailed_state == DetailedState::Connected {
                Step::new(
                    None,
                    None,
                    &[Action::StoreLease, Action::ConfigurationChanged],
                )
            } else {
                Step::new(None, Some(DetailedState::Connected), &[Action::StoreLease])
            }
        }

        EventKind::SettingsChanged => {
            if state.run_state == RunState::Running {
                Step::new(
                    None,
                    None,
                    &[
                        Action::ResetConnections {
                            disable_interface: false,
                        },
                        Action::Reconfigure,
                    ],
                )
            } else {
                NOTHING
            }
        }
    }
}
