//! Service layer
//!
//! Contains business logic separated from HTTP handlers and job dispatch.
//! Services orchestrate database, cache, and federation operations.

mod grants;
mod import;
mod quotes;

pub use grants::{canonical_note, derive_note_id, grant_note, GrantService};
pub use import::{recognize, CredentialFormat, ImportService, ParsedCredential};
pub use quotes::{decode_stamp_segment, encode_stamp_url, QuoteService};
