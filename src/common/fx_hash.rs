//! Fx-hashed collections used throughout the analyses and passes.
//!
//! Keys are small integer ids (values, blocks, instructions), so the
//! non-cryptographic Fx hasher is a better fit than SipHash.

pub use rustc_hash::{FxHashMap, FxHashSet};
