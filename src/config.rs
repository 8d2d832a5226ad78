use crate::error::{FtlError, Result};

pub type BaseType = usize;

pub type Addr = BaseType;
pub type Lba = BaseType;
pub type PageId = BaseType;
pub type BlockId = BaseType;
pub type Counter = BaseType;

pub const PAGE_SIZE: BaseType = 512;
pub const PAGES_PER_BLOCK: BaseType = 10;
pub const PHYSICAL_BLOCKS: BaseType = 13;
pub const LOGICAL_BLOCKS: BaseType = 10;

/// GC keeps going until this many blocks are free: one for the host, one spare for relocation.
pub const GC_FREE_TARGET: BaseType = 2;

/// Shape of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub page_size: BaseType,
    pub pages_per_block: BaseType,
    pub blocks: BaseType,
    pub logical_pages: BaseType,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            page_size: PAGE_SIZE,
            pages_per_block: PAGES_PER_BLOCK,
            blocks: PHYSICAL_BLOCKS,
            logical_pages: LOGICAL_BLOCKS * PAGES_PER_BLOCK,
        }
    }
}

impl Geometry {
    pub fn new(page_size: BaseType, pages_per_block: BaseType, blocks: BaseType, logical_pages: BaseType) -> Self {
        Geometry { page_size, pages_per_block, blocks, logical_pages }
    }

    /// Derives the logical capacity from an over-provisioning percentage of the physical pages.
    pub fn with_overprovisioning(page_size: BaseType, pages_per_block: BaseType, blocks: BaseType, op: f64) -> Self {
        let all_pages = pages_per_block * blocks;
        let op_pages = (all_pages as f64 * (op / 100.)).trunc() as Addr;
        let spare_floor = blocks.saturating_sub(2) * pages_per_block;

        Geometry {
            page_size,
            pages_per_block,
            blocks,
            logical_pages: all_pages.saturating_sub(op_pages).min(spare_floor),
        }
    }

    pub fn all_pages(&self) -> BaseType {
        self.blocks * self.pages_per_block
    }

    pub fn physical_capacity(&self) -> BaseType {
        self.all_pages() * self.page_size
    }

    pub fn logical_capacity(&self) -> BaseType {
        self.logical_pages * self.page_size
    }

    pub fn block_size(&self) -> BaseType {
        self.pages_per_block * self.page_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(FtlError::InvalidGeometry("page size must be non-zero".into()));
        }
        if self.pages_per_block == 0 {
            return Err(FtlError::InvalidGeometry("pages per block must be non-zero".into()));
        }
        if self.blocks < 3 {
            return Err(FtlError::InvalidGeometry(format!("need at least 3 blocks, got {}", self.blocks)));
        }
        if self.logical_pages == 0 {
            return Err(FtlError::InvalidGeometry("no logical pages left to address".into()));
        }
        // Two blocks of slack: the host's next block and the GC relocation spare.
        let limit = (self.blocks - 2) * self.pages_per_block;
        if self.logical_pages > limit {
            return Err(FtlError::InvalidGeometry(format!(
                "{} logical pages do not fit {} blocks of {} pages with two spare blocks",
                self.logical_pages, self.blocks, self.pages_per_block
            )));
        }
        Ok(())
    }
}
