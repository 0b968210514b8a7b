//! Room ownership: state, the single-writer runtime, and the handle
//! other components talk to it through.

pub mod handle;
pub mod runtime;
pub mod state;

pub use handle::{JoinRequest, RoomCommand, RoomHandle};
pub use runtime::{RoomRuntime, RuntimeServices};
pub use state::RoomState;
