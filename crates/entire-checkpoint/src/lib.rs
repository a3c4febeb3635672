//! The checkpoint engine for the manual-commit strategy.
//!
//! Turns become commits on an ephemeral per-base *shadow ref*
//! ([`store`]); a user commit collapses the shadow chain into one
//! permanent entry on the orphan metadata branch ([`condense`]) with an
//! agent/human line split ([`attribution`]); any past checkpoint can be
//! projected back onto the working tree ([`rewind`]).

pub mod attribution;
pub mod condense;
mod error;
pub mod rewind;
pub mod shadow;
pub mod store;

pub use condense::{condense, CondenseOptions, CondenseOutcome, Summarizer};
pub use error::CheckpointError;
pub use store::{CheckpointStore, SavedCheckpoint, TemporaryCheckpoint};
