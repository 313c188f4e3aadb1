//! Entry codec
//!
//! The single place where typed payloads are erased to bytes. Tiers only ever
//! see the output of [`EntryCodec`].

mod json;
pub use json::EntryCodec;
