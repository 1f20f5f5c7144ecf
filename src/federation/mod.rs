//! ActivityPub federation module
//!
//! Handles:
//! - Activity delivery (outbox)
//! - HTTP Signatures
//! - Content sealing and fingerprints
//! - WebFinger
//! - Remote actor fetching and caching

mod delivery;
mod remote;
mod signature;
mod signing;
mod webfinger;

pub use delivery::{builder, ActivityDelivery, DeliveryResult};
pub use remote::{
    fetch_remote_actor, fetch_remote_object, parse_remote_actor, RemoteActor, RemoteActorCache,
};
pub use signature::{generate_digest, sign_request, SignatureHeaders};
pub use signing::{hex_encode, seal_payload, sha256_hex, SealedPayload};
pub use webfinger::{generate_webfinger_response, WebFingerLink, WebFingerResponse};
