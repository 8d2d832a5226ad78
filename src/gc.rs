//! Garbage collection: pick the block with the fewest valid pages, move its
//! live pages to the GC write cursor, erase it and hand it back to the pool.

#[cfg(test)]
use std::{println as debug, println as error, println as trace};

#[cfg(not(test))]
use log::*;

use crate::block::BlockStatus;
use crate::config::*;
use crate::error::{FtlError, Result};
use crate::ftl::{Ftl, GcOutcome};
use crate::mapping::Pca;
use crate::nand::NandMedia;

impl<M: NandMedia> Ftl<M> {
    /// Compacts victims one at a time until `GC_FREE_TARGET` blocks are free.
    pub fn reclaim(&mut self) -> Result<GcOutcome> {
        self.stats.gc_runs += 1;
        let mut victims = 0;
        let mut relocated = 0;

        while self.free_blocks < GC_FREE_TARGET {
            let Some(victim) = self.select_victim() else {
                break;
            };
            if self.relocation_room(victim) < self.blocks[victim].valid_counter() {
                debug!("GC: no room to relocate block {}", victim);
                break;
            }
            relocated += self.compact(victim)?;
            victims += 1;
        }

        if victims == 0 {
            debug!("GC: nothing reclaimable, {} blocks free", self.free_blocks);
            return Ok(GcOutcome::NoReclaimableSpace);
        }
        debug!("GC: erased {} blocks, relocated {} pages, {} blocks free", victims, relocated, self.free_blocks);
        Ok(GcOutcome::Reclaimed { victims, relocated })
    }

    /// Closed block with the fewest valid pages, lowest index on ties.
    ///
    /// When every closed block is fully valid the GC's own open block is the
    /// only place stale pages can hide, so it is considered as a last resort.
    ///
    /// The GC reservation needs no check here: it always names a free block,
    /// and it is dropped the moment that block is opened again.
    pub(crate) fn select_victim(&self) -> Option<BlockId> {
        let ppb = self.geometry.pages_per_block;
        let closed = self
            .blocks
            .iter()
            .filter(|b| b.status() == BlockStatus::Closed)
            .min_by_key(|b| (b.valid_counter(), b.id()))
            .filter(|b| b.valid_counter() < ppb)
            .map(|b| b.id());
        if closed.is_some() {
            return closed;
        }

        self.gc
            .open
            .filter(|&id| self.blocks[id].stale_counter() > 0)
    }

    /// Pages the relocation cursor can still take without touching `victim`.
    fn relocation_room(&self, victim: BlockId) -> Counter {
        let open = match self.gc.open {
            Some(id) if id != victim => self.blocks[id].free_counter(),
            _ => 0,
        };
        open + self.free_blocks * self.geometry.pages_per_block
    }

    fn next_gc_page(&mut self) -> Result<Pca> {
        if let Some(id) = self.gc.open {
            if let Some(pca) = self.program_next(id) {
                if self.blocks[id].status() == BlockStatus::Closed {
                    self.gc.open = None;
                }
                self.gc.last = Some(pca);
                return Ok(pca);
            }
            self.gc.open = None;
        }

        let start = self.gc.scan_start(self.geometry.blocks);
        let id = self.open_block(start).ok_or(FtlError::OutOfSpace)?;
        self.gc.open = Some(id);
        let pca = self.program_next(id).ok_or(FtlError::OutOfSpace)?;
        if self.blocks[id].status() == BlockStatus::Closed {
            self.gc.open = None;
        }
        self.gc.last = Some(pca);
        Ok(pca)
    }

    /// Moves every valid page out of `victim`, then erases it.
    fn compact(&mut self, victim: BlockId) -> Result<Counter> {
        if self.gc.open == Some(victim) {
            self.blocks[victim].seal();
            self.gc.open = None;
        }

        trace!(
            "GC: victim block {} ({} valid, {} stale)",
            victim,
            self.blocks[victim].valid_counter(),
            self.blocks[victim].stale_counter()
        );

        let pages: Vec<PageId> = self.blocks[victim].valid_pages().collect();
        let mut buf = vec![0; self.geometry.page_size];
        let mut moved = 0;

        for page in pages {
            let from = Pca::new(victim, page);
            let Some(lba) = self.mapping.owner(from) else {
                error!("GC: valid page {} has no owner, dropping it", from);
                self.blocks[victim].invalidate(page);
                continue;
            };

            self.media.read_page(victim, page, &mut buf)?;
            let to = self.next_gc_page()?;
            self.program_page(to, &buf)?;

            self.mapping.remap(lba, to);
            self.blocks[victim].invalidate(page);
            self.stats.relocated_pages += 1;
            moved += 1;
        }

        self.media.erase_block(victim)?;
        self.blocks[victim].erase();
        self.free_blocks += 1;
        self.gc_reserved = Some(victim);
        self.stats.victims_erased += 1;

        Ok(moved)
    }
}
