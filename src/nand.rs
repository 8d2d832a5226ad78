//! Simulated NAND media.
//!
//! The FTL only needs three primitives from the medium: program a page, read a
//! page back and erase a whole block. Two media ship with the crate, an
//! in-memory one for tests and benchmarks and a directory of block files that
//! mirrors a FUSE SSD simulator keeping one file per erase block.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::config::{BlockId, Geometry, PageId};
use crate::error::NandError;
use crate::mapping::Pca;

pub type NandResult<T> = std::result::Result<T, NandError>;

pub trait NandMedia {
    /// Read one programmed page into `buf`, which must be exactly one page long.
    fn read_page(&self, block: BlockId, page: PageId, buf: &mut [u8]) -> NandResult<()>;

    /// Program one erased page.
    fn write_page(&mut self, block: BlockId, page: PageId, buf: &[u8]) -> NandResult<()>;

    /// Return every page of `block` to the erased state.
    fn erase_block(&mut self, block: BlockId) -> NandResult<()>;
}

fn check_addr(geometry: &Geometry, block: BlockId, page: PageId) -> NandResult<Pca> {
    Pca::checked(geometry, block, page).ok_or(NandError::OutOfRange { block, page })
}

fn check_buf(geometry: &Geometry, len: usize) -> NandResult<()> {
    if len != geometry.page_size {
        return Err(NandError::BufferSize { expected: geometry.page_size, got: len });
    }
    Ok(())
}

/// RAM-backed medium that enforces erase-before-program.
pub struct MemNand {
    geometry: Geometry,
    data: Vec<u8>,
    programmed: Vec<bool>,
}

impl MemNand {
    pub fn new(geometry: Geometry) -> Self {
        MemNand {
            geometry,
            data: vec![0; geometry.physical_capacity()],
            programmed: vec![false; geometry.all_pages()],
        }
    }

    fn index(&self, block: BlockId, page: PageId) -> usize {
        block * self.geometry.pages_per_block + page
    }

    /// Whether a page currently holds programmed data.
    pub fn is_programmed(&self, block: BlockId, page: PageId) -> bool {
        self.programmed[self.index(block, page)]
    }
}

impl NandMedia for MemNand {
    fn read_page(&self, block: BlockId, page: PageId, buf: &mut [u8]) -> NandResult<()> {
        let idx = check_addr(&self.geometry, block, page)?.index(self.geometry.pages_per_block);
        check_buf(&self.geometry, buf.len())?;

        if !self.programmed[idx] {
            return Err(NandError::Unprogrammed { block, page });
        }
        let start = idx * self.geometry.page_size;
        buf.copy_from_slice(&self.data[start..start + self.geometry.page_size]);
        Ok(())
    }

    fn write_page(&mut self, block: BlockId, page: PageId, buf: &[u8]) -> NandResult<()> {
        let idx = check_addr(&self.geometry, block, page)?.index(self.geometry.pages_per_block);
        check_buf(&self.geometry, buf.len())?;

        if self.programmed[idx] {
            return Err(NandError::AlreadyProgrammed { block, page });
        }
        let start = idx * self.geometry.page_size;
        self.data[start..start + self.geometry.page_size].copy_from_slice(buf);
        self.programmed[idx] = true;
        Ok(())
    }

    fn erase_block(&mut self, block: BlockId) -> NandResult<()> {
        let first = check_addr(&self.geometry, block, 0)?.index(self.geometry.pages_per_block);
        let ppb = self.geometry.pages_per_block;
        self.programmed[first..first + ppb].fill(false);
        let start = first * self.geometry.page_size;
        self.data[start..start + self.geometry.block_size()].fill(0);
        Ok(())
    }
}

/// One file per block, page `i` stored at byte offset `i * page_size`.
///
/// A page counts as programmed once the block file reaches past it, so pages
/// must be programmed in ascending order within a block, which is how the
/// allocator hands them out.
pub struct FileNand {
    geometry: Geometry,
    dir: PathBuf,
}

impl FileNand {
    /// Creates (or truncates) one empty file per block under `dir`.
    pub fn create(dir: impl AsRef<Path>, geometry: Geometry) -> NandResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let nand = FileNand { geometry, dir };
        for block in 0..geometry.blocks {
            File::create(nand.block_path(block))?;
        }
        debug!("Created {} NAND block files under {}", geometry.blocks, nand.dir.display());
        Ok(nand)
    }

    fn block_path(&self, block: BlockId) -> PathBuf {
        self.dir.join(format!("nand_{}", block))
    }

    fn offset(&self, page: PageId) -> u64 {
        (page * self.geometry.page_size) as u64
    }
}

impl NandMedia for FileNand {
    fn read_page(&self, block: BlockId, page: PageId, buf: &mut [u8]) -> NandResult<()> {
        check_addr(&self.geometry, block, page)?;
        check_buf(&self.geometry, buf.len())?;

        let file = File::open(self.block_path(block))?;
        let end = self.offset(page) + self.geometry.page_size as u64;
        if file.metadata()?.len() < end {
            return Err(NandError::Unprogrammed { block, page });
        }
        file.read_exact_at(buf, self.offset(page))?;
        Ok(())
    }

    fn write_page(&mut self, block: BlockId, page: PageId, buf: &[u8]) -> NandResult<()> {
        check_addr(&self.geometry, block, page)?;
        check_buf(&self.geometry, buf.len())?;

        let file = OpenOptions::new().write(true).open(self.block_path(block))?;
        if file.metadata()?.len() > self.offset(page) {
            return Err(NandError::AlreadyProgrammed { block, page });
        }
        file.write_all_at(buf, self.offset(page))?;
        Ok(())
    }

    fn erase_block(&mut self, block: BlockId) -> NandResult<()> {
        check_addr(&self.geometry, block, 0)?;
        File::create(self.block_path(block))?;
        trace!("Erased {}", self.block_path(block).display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Geometry {
        Geometry::new(16, 4, 3, 4)
    }

    #[test]
    fn mem_nand_refuses_overwrite_until_erase() {
        let mut nand = MemNand::new(tiny());
        let page = [0xAB; 16];
        nand.write_page(1, 2, &page).unwrap();
        assert!(matches!(
            nand.write_page(1, 2, &page),
            Err(NandError::AlreadyProgrammed { block: 1, page: 2 })
        ));

        nand.erase_block(1).unwrap();
        assert!(!nand.is_programmed(1, 2));
        nand.write_page(1, 2, &[0xCD; 16]).unwrap();

        let mut buf = [0; 16];
        nand.read_page(1, 2, &mut buf).unwrap();
        assert_eq!(buf, [0xCD; 16]);
    }

    #[test]
    fn mem_nand_rejects_bad_requests() {
        let mut nand = MemNand::new(tiny());
        let mut buf = [0; 16];
        assert!(matches!(nand.read_page(0, 0, &mut buf), Err(NandError::Unprogrammed { .. })));
        assert!(matches!(nand.read_page(3, 0, &mut buf), Err(NandError::OutOfRange { .. })));
        assert!(matches!(nand.write_page(0, 4, &buf), Err(NandError::OutOfRange { .. })));
        assert!(matches!(nand.write_page(0, 0, &[0; 8]), Err(NandError::BufferSize { expected: 16, got: 8 })));
    }

    #[test]
    fn file_nand_round_trips_pages_and_erases() {
        let dir = tempfile::tempdir().unwrap();
        let mut nand = FileNand::create(dir.path(), tiny()).unwrap();
        assert!(dir.path().join("nand_2").exists());

        nand.write_page(2, 0, &[1; 16]).unwrap();
        nand.write_page(2, 1, &[2; 16]).unwrap();
        assert!(matches!(nand.write_page(2, 0, &[3; 16]), Err(NandError::AlreadyProgrammed { .. })));

        let mut buf = [0; 16];
        nand.read_page(2, 1, &mut buf).unwrap();
        assert_eq!(buf, [2; 16]);
        assert!(matches!(nand.read_page(2, 3, &mut buf), Err(NandError::Unprogrammed { .. })));

        nand.erase_block(2).unwrap();
        assert!(matches!(nand.read_page(2, 0, &mut buf), Err(NandError::Unprogrammed { .. })));
        nand.write_page(2, 0, &[4; 16]).unwrap();
    }
}
