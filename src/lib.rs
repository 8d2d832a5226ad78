//! A page-mapped flash translation layer running on simulated NAND.
//!
//! [`Ssd`] exposes the device as one byte-addressable volume. Underneath,
//! [`Ftl`] keeps the logical-to-physical tables, allocates pages out of place
//! and garbage collects stale blocks, talking to a [`NandMedia`].

pub mod block;
pub mod config;
pub mod error;
pub mod ftl;
mod gc;
pub mod mapping;
pub mod nand;
pub mod ssd;

pub use config::Geometry;
pub use error::{FtlError, NandError, Result};
pub use ftl::{Ftl, FtlStats, GcOutcome};
pub use mapping::Pca;
pub use nand::{FileNand, MemNand, NandMedia};
pub use ssd::{Ssd, Stats};
