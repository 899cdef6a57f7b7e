//! # huddle-core
//!
//! Types shared by every part of the huddle relay.
//!
//! - [`identity`]: stable per-client identities and the provider that mints
//!   or accepts them on handshake
//! - [`ids`]: per-connection ids and room keys
//! - [`payload`]: the opaque payload relayed between room members and its
//!   wire framing

#![deny(unsafe_code)]

pub mod identity;
pub mod ids;
pub mod payload;

pub use identity::{Identity, IdentityProvider, RandomIdentityProvider, Resolved};
pub use ids::{ConnectionId, RoomKey};
pub use payload::{CodecError, Frame, Payload};
