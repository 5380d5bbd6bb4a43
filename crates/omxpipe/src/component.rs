// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Call and callback surfaces of an asynchronous media component
//!
//! A component accepts every call synchronously and confirms the
//! interesting ones later through callbacks delivered from its own thread.
//! This module defines both surfaces:
//!
//! - [`Component`] - the outbound calls a session makes
//! - [`ComponentCallbacks`] - the inbound notifications a component delivers
//! - [`ComponentState`], [`Command`], [`ComponentEvent`], [`ComponentError`]
//!   - the vocabulary both sides speak
//!
//! Raw enum values follow the component ABI so adapters over real hardware
//! stacks can translate without tables.

use std::fmt;

use unix_ts::Timestamp;

use crate::buffer::{BufferFlags, BufferId};
use crate::params::{Param, ParamIndex};
use crate::Error;

/// Lifecycle state of a component
///
/// States form a ladder the session climbs and descends one rung at a
/// time: Loaded holds no buffers, Idle holds all of them, Executing and
/// Pause exchange them. Invalid is terminal and WaitingForResources parks
/// a component that lost a hardware grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ComponentState {
    /// Unrecoverable failure state
    Invalid = 0,

    /// Constructed, holding no resources
    Loaded = 1,

    /// Fully populated with buffers, not processing
    Idle = 2,

    /// Processing and exchanging buffers
    Executing = 3,

    /// Buffer exchange suspended, positions retained
    Pause = 4,

    /// Waiting for a resource grant before reaching Idle
    WaitingForResources = 5,
}

impl ComponentState {
    /// Convert from the raw wire value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ComponentState::Invalid),
            1 => Some(ComponentState::Loaded),
            2 => Some(ComponentState::Idle),
            3 => Some(ComponentState::Executing),
            4 => Some(ComponentState::Pause),
            5 => Some(ComponentState::WaitingForResources),
            _ => None,
        }
    }

    /// Get human-readable name for this state
    pub fn name(&self) -> &'static str {
        match self {
            ComponentState::Invalid => "Invalid",
            ComponentState::Loaded => "Loaded",
            ComponentState::Idle => "Idle",
            ComponentState::Executing => "Executing",
            ComponentState::Pause => "Pause",
            ComponentState::WaitingForResources => "WaitingForResources",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Command issued to a component with `send_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request a state transition, confirmed asynchronously
    SetState(ComponentState),

    /// Flush queued buffers on a port back to the client
    FlushPort(u32),

    /// Take a port out of service
    DisablePort(u32),

    /// Return a port to service
    EnablePort(u32),

    /// Ask the component to mark the next buffer through a port
    MarkBuffer(u32),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetState(state) => write!(f, "SetState({})", state),
            Command::FlushPort(port) => write!(f, "FlushPort({})", port),
            Command::DisablePort(port) => write!(f, "DisablePort({})", port),
            Command::EnablePort(port) => write!(f, "EnablePort({})", port),
            Command::MarkBuffer(port) => write!(f, "MarkBuffer({})", port),
        }
    }
}

/// Failure code reported by a component
///
/// Codes mirror the component ABI (`0x8000_1000` base). `from_raw` is
/// total; unrecognized codes land in [`ComponentError::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentError {
    /// Allocation or resource acquisition failed
    InsufficientResources,

    /// Failure with no more specific code
    Undefined,

    /// Component name is malformed
    InvalidComponentName,

    /// No component with the given name exists
    ComponentNotFound,

    /// Component failed to instantiate
    InvalidComponent,

    /// A call argument is out of range or malformed
    BadParameter,

    /// Component has entered the Invalid state
    InvalidState,

    /// Hardware fault
    Hardware,

    /// Component did not respond in time
    Timeout,

    /// The requested state cannot be reached from the current one
    IncorrectStateTransition,

    /// The call is not legal in the current state
    IncorrectStateOperation,

    /// Parameter value is understood but not supported
    UnsupportedSetting,

    /// Parameter index is not implemented by this component
    UnsupportedIndex,

    /// No port with the given index
    BadPortIndex,

    /// Operation requires a populated port
    PortUnpopulated,

    /// Code not named by this enum
    Unknown(u32),
}

impl ComponentError {
    /// Convert from the raw wire code
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x8000_1000 => ComponentError::InsufficientResources,
            0x8000_1001 => ComponentError::Undefined,
            0x8000_1002 => ComponentError::InvalidComponentName,
            0x8000_1003 => ComponentError::ComponentNotFound,
            0x8000_1004 => ComponentError::InvalidComponent,
            0x8000_1005 => ComponentError::BadParameter,
            0x8000_1009 => ComponentError::Hardware,
            0x8000_100A => ComponentError::InvalidState,
            0x8000_1011 => ComponentError::Timeout,
            0x8000_1018 => ComponentError::IncorrectStateTransition,
            0x8000_1019 => ComponentError::IncorrectStateOperation,
            0x8000_101A => ComponentError::UnsupportedSetting,
            0x8000_101B => ComponentError::UnsupportedIndex,
            0x8000_101C => ComponentError::BadPortIndex,
            0x8000_101D => ComponentError::PortUnpopulated,
            other => ComponentError::Unknown(other),
        }
    }

    /// The raw wire code
    pub fn raw(&self) -> u32 {
        match self {
            ComponentError::InsufficientResources => 0x8000_1000,
            ComponentError::Undefined => 0x8000_1001,
            ComponentError::InvalidComponentName => 0x8000_1002,
            ComponentError::ComponentNotFound => 0x8000_1003,
            ComponentError::InvalidComponent => 0x8000_1004,
            ComponentError::BadParameter => 0x8000_1005,
            ComponentError::Hardware => 0x8000_1009,
            ComponentError::InvalidState => 0x8000_100A,
            ComponentError::Timeout => 0x8000_1011,
            ComponentError::IncorrectStateTransition => 0x8000_1018,
            ComponentError::IncorrectStateOperation => 0x8000_1019,
            ComponentError::UnsupportedSetting => 0x8000_101A,
            ComponentError::UnsupportedIndex => 0x8000_101B,
            ComponentError::BadPortIndex => 0x8000_101C,
            ComponentError::PortUnpopulated => 0x8000_101D,
            ComponentError::Unknown(raw) => *raw,
        }
    }

    /// Get human-readable name for this code
    pub fn name(&self) -> &'static str {
        match self {
            ComponentError::InsufficientResources => "InsufficientResources",
            ComponentError::Undefined => "Undefined",
            ComponentError::InvalidComponentName => "InvalidComponentName",
            ComponentError::ComponentNotFound => "ComponentNotFound",
            ComponentError::InvalidComponent => "InvalidComponent",
            ComponentError::BadParameter => "BadParameter",
            ComponentError::InvalidState => "InvalidState",
            ComponentError::Hardware => "Hardware",
            ComponentError::Timeout => "Timeout",
            ComponentError::IncorrectStateTransition => "IncorrectStateTransition",
            ComponentError::IncorrectStateOperation => "IncorrectStateOperation",
            ComponentError::UnsupportedSetting => "UnsupportedSetting",
            ComponentError::UnsupportedIndex => "UnsupportedIndex",
            ComponentError::BadPortIndex => "BadPortIndex",
            ComponentError::PortUnpopulated => "PortUnpopulated",
            ComponentError::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::Unknown(raw) => write!(f, "Unknown(0x{:08X})", raw),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl std::error::Error for ComponentError {}

/// Event delivered through `ComponentCallbacks::on_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentEvent {
    /// A previously issued command has finished
    CommandComplete {
        /// The command that completed; `SetState` carries the reached state
        command: Command,
    },

    /// The component failed asynchronously
    Error(ComponentError),

    /// A port's definition changed and should be re-queried
    PortSettingsChanged {
        /// Port whose settings changed
        port: u32,
    },

    /// The component propagated buffer flags, end of stream among them
    BufferFlag {
        /// Port the flags apply to
        port: u32,
        /// The propagated flags
        flags: BufferFlags,
    },

    /// A marked buffer passed through the component
    Mark,

    /// A deferred resource grant arrived
    ResourcesAcquired,
}

impl fmt::Display for ComponentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentEvent::CommandComplete { command } => {
                write!(f, "CommandComplete({})", command)
            }
            ComponentEvent::Error(err) => write!(f, "Error({})", err),
            ComponentEvent::PortSettingsChanged { port } => {
                write!(f, "PortSettingsChanged({})", port)
            }
            ComponentEvent::BufferFlag { port, flags } => {
                write!(f, "BufferFlag({}, {})", port, flags)
            }
            ComponentEvent::Mark => write!(f, "Mark"),
            ComponentEvent::ResourcesAcquired => write!(f, "ResourcesAcquired"),
        }
    }
}

/// Outbound call surface of a component
///
/// Every method returns synchronously. Commands and buffer submissions are
/// accepted, not performed: their effects arrive later through
/// [`ComponentCallbacks`]. Implementations must tolerate calls from any
/// thread.
pub trait Component: Send + Sync {
    /// Issue a command; completion is reported by `on_event`
    fn send_command(&self, command: Command) -> Result<(), Error>;

    /// Read a parameter
    fn get_parameter(&self, index: ParamIndex) -> Result<Param, Error>;

    /// Write a parameter; legal only while the affected port is quiescent
    fn set_parameter(&self, param: &Param) -> Result<(), Error>;

    /// Ask the component to allocate one buffer on a port
    ///
    /// Legal while the component is moving from Loaded to Idle; the
    /// transition confirms only after every port holds its full count.
    fn allocate_buffer(&self, port: u32, size: usize) -> Result<BufferId, Error>;

    /// Register a client-allocated buffer on a port
    fn use_buffer(&self, port: u32, size: usize) -> Result<BufferId, Error>;

    /// Release one buffer; the move back to Loaded confirms once all are
    /// released
    fn free_buffer(&self, port: u32, id: BufferId) -> Result<(), Error>;

    /// Hand an empty output buffer to the component to fill
    fn fill_this_buffer(&self, id: BufferId) -> Result<(), Error>;

    /// Hand a filled input buffer to the component to consume
    fn empty_this_buffer(&self, id: BufferId, filled: usize, flags: BufferFlags)
        -> Result<(), Error>;

    /// The last confirmed state
    fn state(&self) -> ComponentState;

    /// Release the component handle
    ///
    /// Fails with `IncorrectStateOperation` while any buffer is still
    /// registered.
    fn close(&self) -> Result<(), Error>;
}

/// Inbound callback surface a component delivers into
///
/// Callbacks arrive on the component's own delivery thread. Implementations
/// must return quickly and must never block on locks the calling component
/// could be holding; expensive work belongs on the far side of a queue.
pub trait ComponentCallbacks: Send + Sync {
    /// An event arrived from the component
    fn on_event(&self, event: ComponentEvent);

    /// An input buffer was consumed and returned to the client
    fn on_input_returned(&self, id: BufferId);

    /// An output buffer was filled and returned to the client
    fn on_output_returned(
        &self,
        id: BufferId,
        filled: usize,
        flags: BufferFlags,
        timestamp: Option<Timestamp>,
    );
}
