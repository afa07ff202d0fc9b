//! Participant role: liveness registration and the message driven state transition
//! executor.

mod message;
mod participant;
mod state_model;
pub use message::*;
pub use participant::*;
pub use state_model::*;
