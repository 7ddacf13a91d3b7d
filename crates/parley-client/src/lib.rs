//! Client-side session view for Parley front ends.
//!
//! [`state`] holds an immutable snapshot of what the chat UI renders and a
//! pure reducer over a closed action set. [`events`] decodes the realtime
//! channel's server events into those actions. [`waveform`] decodes recorded
//! clips and computes the amplitude envelope a recorder draws.

pub mod events;
pub mod state;
pub mod waveform;

pub use events::ServerEvent;
pub use state::{reduce, Action, ChatEntry, ClientState, ConnectionStatus, Store};
