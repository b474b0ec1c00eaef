//! Entity resolution over the reference snapshot
//!
//! Maps free-form spans to canonical identities. Ambiguity is always
//! surfaced to the caller; no rule here ever picks an entity on the user's
//! behalf.

pub mod sector;
pub mod stock;
