//! Integration tests for imgbundle
//!
//! Every scenario runs against the in-memory registry, so pushes and pulls go through
//! the full packaging, classification, extraction and lock rewrite paths without a
//! network.

pub mod common;
pub mod push;
