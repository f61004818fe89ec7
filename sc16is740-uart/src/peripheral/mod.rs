//! Peripheral chip definitions.
//!
//! Register maps and bit-level encodings for the chips driven by this
//! crate. Bus access lives in [`crate::transport`]; stream behavior lives in
//! [`crate::uart`].

pub mod sc16is740;
