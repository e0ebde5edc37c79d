//! Signaling protocol: event types and their JSON wire form.

pub mod codec;
pub mod events;

pub use codec::{decode, encode, Decoded};
pub use events::{CustomEvent, MediaEvent};
