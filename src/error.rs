use std::io;
use thiserror::Error;

use crate::config::{BlockId, Lba, PageId};

/// Failures reported by a NAND medium.
#[derive(Error, Debug)]
pub enum NandError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("page {block}:{page} is outside the medium")]
    OutOfRange { block: BlockId, page: PageId },
    #[error("page {block}:{page} was not programmed since the last erase")]
    Unprogrammed { block: BlockId, page: PageId },
    #[error("page {block}:{page} is already programmed, erase the block first")]
    AlreadyProgrammed { block: BlockId, page: PageId },
    #[error("buffer of {got} bytes does not match page size {expected}")]
    BufferSize { expected: usize, got: usize },
}

#[derive(Error, Debug)]
pub enum FtlError {
    #[error("requested {requested} bytes exceeds capacity of {capacity} bytes")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("no free physical page left, even after garbage collection")]
    OutOfSpace,
    #[error("NAND error: {0}")]
    Nand(#[from] NandError),
    #[error("LBA {lba} is outside the logical space of {max} pages")]
    LbaOutOfRange { lba: Lba, max: Lba },
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

pub type Result<T> = std::result::Result<T, FtlError>;
