//! Domain Layer - Relay state and message types.
//!
//! Pure types and state machines with no I/O: the upstream link lifecycle,
//! commands and their queue, and the status snapshot kept for late joiners.

/// Raw frames as they cross a socket.
pub mod frame;

/// Upstream link state machine.
pub mod link;

/// Commands, client requests and the command queue.
pub mod command;

/// Status events and the snapshot store.
pub mod snapshot;
