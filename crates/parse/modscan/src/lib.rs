//! Static module discovery for Rust sources.
//!
//! Re-derives the set of files a compilation unit needs by reading source
//! text only: `mod` declarations, `#[path]` overrides, and the
//! `#![crate_id]` header. No compiler is invoked.
//!
//! - [`scanner`] extracts the files one source file references directly.
//! - [`resolve`] follows those references to a transitive closure.
//! - [`crate_id`] reads the crate name/version header.

pub mod crate_id;
mod error;
mod path;
pub mod resolve;
pub mod scanner;

pub use crate_id::{CrateId, read_crate_id};
pub use error::ScanError;
pub use path::normalize;
pub use resolve::{DependencyResolver, DependencySet, resolve_transitive};
pub use scanner::{scan, scan_source};
