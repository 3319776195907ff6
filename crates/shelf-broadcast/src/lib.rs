//! Change broadcast for shelf.
//!
//! Every bucket may have one [`BroadcastGroup`]: an input queue pumped by a
//! distribution task into a fan-out channel that any number of [`Member`]s
//! read from. The [`BroadcastRegistry`] creates groups lazily on the first
//! subscription for a bucket, so publishing to a bucket nobody watches costs
//! a map lookup and nothing else.

pub mod error;
pub mod event;
pub mod group;
pub mod registry;

pub use error::{BroadcastError, BroadcastResult};
pub use event::ChangeEvent;
pub use group::{BroadcastGroup, Member, TypedMember};
pub use registry::{BroadcastRegistry, CallbackSubscription, DEFAULT_CHANNEL_CAPACITY};
