//! CryptoBlob core: the cryptographic packing layer that turns a source
//! directory into a versioned, tenant-scoped encrypted blob and back.
//!
//! Modules are layered leaves-first: [`primitives`] and [`codec`] have no
//! internal dependencies; [`model`] builds the wire records on top of
//! [`codec`]; [`collector`] and [`partitioner`] build the in-memory file
//! inventory; [`sealer`] and [`unsealer`] drive [`primitives`] and
//! [`model`] to pack and unpack a [`blob::CryptoBlob`]. [`backend`] is
//! ambient tooling consumed by an orchestrator, not by the core itself.

pub mod backend;
pub mod blob;
pub mod codec;
pub mod collector;
pub mod error;
pub mod model;
pub mod partitioner;
pub mod primitives;
pub mod sealer;
pub mod unsealer;
pub mod writeout;

pub use blob::CryptoBlob;
pub use error::{CryptoBlobError, Result};
