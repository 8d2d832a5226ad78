#[cfg(test)]
use std::{println as trace, println as debug};
use byte_unit::Byte;

#[cfg(not(test))]
use log::*;

use crate::block::{Block, BlockStatus};
use crate::config::*;
use crate::error::{FtlError, NandError, Result};
use crate::mapping::{MappingTable, Pca};
use crate::nand::NandMedia;

/// Write cursor of one allocation stream, host writes or GC relocation.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Cursor {
    /// Block currently receiving this stream's pages.
    pub(crate) open: Option<BlockId>,
    /// Last page handed out.
    pub(crate) last: Option<Pca>,
}

impl Cursor {
    /// Free-block scans start right after the block this stream last wrote to.
    pub(crate) fn scan_start(&self, blocks: BlockId) -> BlockId {
        self.last.map_or(0, |pca| (pca.block + 1) % blocks)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FtlStats {
    pub nand_bytes_written: Counter,
    pub physical_pages_written: Counter,
    pub gc_runs: Counter,
    pub victims_erased: Counter,
    pub relocated_pages: Counter,
}

pub struct Ftl<M: NandMedia> {
    pub(crate) geometry: Geometry,
    pub(crate) media: M,
    pub(crate) mapping: MappingTable,
    pub(crate) blocks: Vec<Block>,

    pub(crate) host: Cursor,
    pub(crate) gc: Cursor,

    pub(crate) free_blocks: Counter,
    /// Block most recently erased by GC, skipped by the victim scan until it is opened again.
    pub(crate) gc_reserved: Option<BlockId>,

    pub(crate) stats: FtlStats,
}

impl<M: NandMedia> Ftl<M> {
    /// Builds the tables for `geometry` on top of an erased medium.
    pub fn new(geometry: Geometry, media: M) -> Result<Self> {
        geometry.validate()?;

        trace!("Pages: {} logical / {} physical", geometry.logical_pages, geometry.all_pages());
        trace!(
            "Physical Capacity: {} bytes, {}",
            geometry.physical_capacity(),
            Byte::from(geometry.physical_capacity()).get_appropriate_unit(true).to_string()
        );
        trace!(
            "User Capacity: {} bytes, {}",
            geometry.logical_capacity(),
            Byte::from(geometry.logical_capacity()).get_appropriate_unit(true).to_string()
        );

        Ok(Ftl {
            geometry,
            media,
            mapping: MappingTable::new(&geometry),
            blocks: (0..geometry.blocks).map(|id| Block::new(id, geometry.pages_per_block)).collect(),
            host: Cursor::default(),
            gc: Cursor::default(),
            free_blocks: geometry.blocks,
            gc_reserved: None,
            stats: FtlStats::default(),
        })
    }

    /// Drops every mapping and erases all written blocks. Lifetime counters survive.
    pub fn reset(&mut self) -> Result<()> {
        for id in 0..self.geometry.blocks {
            if self.blocks[id].status() != BlockStatus::Free {
                self.media.erase_block(id)?;
                self.blocks[id].erase();
            }
        }
        self.mapping.clear();
        self.host = Cursor::default();
        self.gc = Cursor::default();
        self.free_blocks = self.geometry.blocks;
        self.gc_reserved = None;

        debug!("FTL reset, {} blocks free", self.free_blocks);
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn stats(&self) -> FtlStats {
        self.stats
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn free_blocks(&self) -> Counter {
        self.free_blocks
    }

    pub fn gc_reserved(&self) -> Option<BlockId> {
        self.gc_reserved
    }

    /// Last page handed to a host write, `None` before the first one.
    pub fn write_pointer(&self) -> Option<Pca> {
        self.host.last
    }

    pub fn lookup(&self, lba: Lba) -> Option<Pca> {
        self.mapping.lookup(lba)
    }

    pub fn owner(&self, pca: Pca) -> Option<Lba> {
        self.mapping.owner(pca)
    }

    fn check_lba(&self, lba: Lba) -> Result<()> {
        if lba >= self.geometry.logical_pages {
            return Err(FtlError::LbaOutOfRange { lba, max: self.geometry.logical_pages });
        }
        Ok(())
    }

    /// Opens the first free block at or after `start`, wrapping around.
    pub(crate) fn open_block(&mut self, start: BlockId) -> Option<BlockId> {
        let blocks = self.geometry.blocks;
        let id = (0..blocks)
            .map(|i| (start + i) % blocks)
            .find(|&id| self.blocks[id].status() == BlockStatus::Free)?;

        self.blocks[id].open();
        self.free_blocks -= 1;
        if self.gc_reserved == Some(id) {
            self.gc_reserved = None;
        }
        trace!("Opened block {}, {} free left", id, self.free_blocks);
        Some(id)
    }

    /// Takes the first free page of an open block and closes the block once it fills up.
    pub(crate) fn program_next(&mut self, id: BlockId) -> Option<Pca> {
        let block = &mut self.blocks[id];
        let page = block.first_free_page()?;
        block.program(page);
        if block.first_free_page().is_none() {
            block.close();
        }
        Some(Pca::new(id, page))
    }

    /// Hands out the next physical page for a host write, running GC when the
    /// free pool is down to its last block.
    pub(crate) fn allocate(&mut self) -> Result<Pca> {
        if let Some(id) = self.host.open {
            if let Some(pca) = self.program_next(id) {
                if self.blocks[id].status() == BlockStatus::Closed {
                    self.host.open = None;
                }
                self.host.last = Some(pca);
                return Ok(pca);
            }
            self.host.open = None;
        }

        if self.free_blocks <= 1 {
            match self.reclaim()? {
                GcOutcome::Reclaimed { .. } => {}
                GcOutcome::NoReclaimableSpace => return Err(FtlError::OutOfSpace),
            }
        }

        let start = self.host.scan_start(self.geometry.blocks);
        let id = self.open_block(start).ok_or(FtlError::OutOfSpace)?;
        self.host.open = Some(id);
        let pca = self.program_next(id).ok_or(FtlError::OutOfSpace)?;
        if self.blocks[id].status() == BlockStatus::Closed {
            self.host.open = None;
        }
        self.host.last = Some(pca);
        Ok(pca)
    }

    /// Writes the page to `pca`. A failed program burns the page as stale.
    pub(crate) fn program_page(&mut self, pca: Pca, data: &[u8]) -> Result<()> {
        if let Err(e) = self.media.write_page(pca.block, pca.page, data) {
            self.blocks[pca.block].invalidate(pca.page);
            return Err(e.into());
        }
        self.stats.nand_bytes_written += self.geometry.page_size;
        self.stats.physical_pages_written += 1;
        Ok(())
    }

    /// Reads one logical page. Pages never written since the last reset read as zeros.
    pub fn ftl_read(&self, lba: Lba) -> Result<Vec<u8>> {
        self.check_lba(lba)?;

        let mut buf = vec![0; self.geometry.page_size];
        if let Some(pca) = self.mapping.lookup(lba) {
            self.media.read_page(pca.block, pca.page, &mut buf)?;
        }
        Ok(buf)
    }

    /// Writes one logical page out of place.
    pub fn ftl_write(&mut self, lba: Lba, data: &[u8]) -> Result<()> {
        self.check_lba(lba)?;
        if data.len() != self.geometry.page_size {
            return Err(NandError::BufferSize { expected: self.geometry.page_size, got: data.len() }.into());
        }

        let new = self.allocate()?;
        self.program_page(new, data)?;

        // The old address comes from the table only now, GC may have moved it during allocation.
        if let Some(old) = self.mapping.remap(lba, new) {
            self.blocks[old.block].invalidate(old.page);
            trace!("LBA {} moved {} -> {}", lba, old, new);
        }
        Ok(())
    }

    /// Walks every table and reports the first broken invariant.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if !self.mapping.is_consistent() {
            return Err("L2P and P2L disagree".into());
        }

        let mut free = 0;
        for block in &self.blocks {
            if !block.is_consistent() {
                return Err(format!("block {} page states do not partition the block", block.id()));
            }
            if block.status() == BlockStatus::Free {
                free += 1;
                if block.free_counter() != block.pages() {
                    return Err(format!("free block {} has written pages", block.id()));
                }
            }

            let owned = (0..block.pages())
                .filter(|&p| self.mapping.owner(Pca::new(block.id(), p)).is_some())
                .count();
            let all_owned_valid = (0..block.pages())
                .filter(|&p| self.mapping.owner(Pca::new(block.id(), p)).is_some())
                .all(|p| block.is_valid_page(p));
            if owned != block.valid_counter() || !all_owned_valid {
                return Err(format!(
                    "block {} counts {} valid pages but {} are mapped",
                    block.id(),
                    block.valid_counter(),
                    owned
                ));
            }
        }

        if free != self.free_blocks {
            return Err(format!("free counter {} but {} blocks are free", self.free_blocks, free));
        }
        if let Some(id) = self.gc_reserved {
            if self.blocks[id].status() != BlockStatus::Free {
                return Err(format!("reserved block {} is in use", id));
            }
        }
        Ok(())
    }
}

/// Result of one garbage collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    Reclaimed { victims: Counter, relocated: Counter },
    NoReclaimableSpace,
}
