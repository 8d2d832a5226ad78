//! Byte-range front end: turns offset/length host requests into whole-page
//! FTL operations, doing read-modify-write for partial pages.

#[cfg(test)]
use std::{println as debug, println as warn};
use std::fmt;

use byte_unit::Byte;
use num_integer::div_rem;

#[cfg(not(test))]
use log::*;

use crate::config::*;
use crate::error::{FtlError, Result};
use crate::ftl::Ftl;
use crate::nand::NandMedia;

pub struct Ssd<M: NandMedia> {
    ftl: Ftl<M>,
    logical_size: Addr,
    host_bytes_written: Counter,
}

/// Snapshot of the device counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub logical_size: Addr,
    pub capacity: Addr,
    pub host_bytes_written: Counter,
    pub nand_bytes_written: Counter,
    pub physical_pages_written: Counter,
    pub write_amplification: Option<f64>,
    pub free_blocks: Counter,
    pub gc_runs: Counter,
    pub victims_erased: Counter,
    pub relocated_pages: Counter,
    pub min_erase_count: Counter,
    pub max_erase_count: Counter,
}

fn human(bytes: usize) -> String {
    Byte::from(bytes).get_appropriate_unit(true).to_string()
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "logical size:   {} of {}", human(self.logical_size), human(self.capacity))?;
        writeln!(f, "host written:   {}", human(self.host_bytes_written))?;
        writeln!(
            f,
            "nand written:   {} ({} pages)",
            human(self.nand_bytes_written),
            self.physical_pages_written
        )?;
        match self.write_amplification {
            Some(wa) => writeln!(f, "WA:             {:.3}", wa)?,
            None => writeln!(f, "WA:             n/a")?,
        }
        writeln!(
            f,
            "GC:             {} runs, {} blocks erased, {} pages relocated",
            self.gc_runs, self.victims_erased, self.relocated_pages
        )?;
        write!(
            f,
            "erase counts:   min {} / max {}, {} blocks free",
            self.min_erase_count, self.max_erase_count, self.free_blocks
        )
    }
}

impl<M: NandMedia> Ssd<M> {
    /// Mounts an empty volume of logical size zero.
    pub fn new(geometry: Geometry, media: M) -> Result<Self> {
        Ok(Ssd { ftl: Ftl::new(geometry, media)?, logical_size: 0, host_bytes_written: 0 })
    }

    pub fn ftl(&self) -> &Ftl<M> {
        &self.ftl
    }

    /// Largest logical size the volume can take.
    pub fn capacity(&self) -> Addr {
        self.ftl.geometry().logical_capacity()
    }

    pub fn logical_size(&self) -> Addr {
        self.logical_size
    }

    pub fn physical_pages_written(&self) -> Counter {
        self.ftl.stats().physical_pages_written
    }

    /// NAND bytes programmed per host byte written, `None` before the first host write.
    pub fn write_amplification(&self) -> Option<f64> {
        if self.host_bytes_written == 0 {
            return None;
        }
        Some(self.ftl.stats().nand_bytes_written as f64 / self.host_bytes_written as f64)
    }

    pub fn stats(&self) -> Stats {
        let ftl = self.ftl.stats();
        let erases = self.ftl.blocks().iter().map(|b| b.erase_counter());
        Stats {
            logical_size: self.logical_size,
            capacity: self.capacity(),
            host_bytes_written: self.host_bytes_written,
            nand_bytes_written: ftl.nand_bytes_written,
            physical_pages_written: ftl.physical_pages_written,
            write_amplification: self.write_amplification(),
            free_blocks: self.ftl.free_blocks(),
            gc_runs: ftl.gc_runs,
            victims_erased: ftl.victims_erased,
            relocated_pages: ftl.relocated_pages,
            min_erase_count: erases.clone().min().unwrap_or(0),
            max_erase_count: erases.max().unwrap_or(0),
        }
    }

    fn check_capacity(&self, size: Addr) -> Result<()> {
        if size > self.capacity() {
            return Err(FtlError::CapacityExceeded { requested: size, capacity: self.capacity() });
        }
        Ok(())
    }

    /// Drops all data and sets a new logical size.
    pub fn reset(&mut self, new_size: Addr) -> Result<()> {
        self.check_capacity(new_size)?;
        self.ftl.reset()?;
        self.logical_size = new_size;
        debug!("Volume reset to {} bytes", new_size);
        Ok(())
    }

    fn expand(&mut self, new_size: Addr) -> Result<()> {
        self.check_capacity(new_size)?;
        if new_size > self.logical_size {
            self.logical_size = new_size;
        }
        Ok(())
    }

    /// Reads up to `length` bytes. Nothing past the logical size is returned.
    pub fn read(&self, offset: Addr, length: usize) -> Result<Vec<u8>> {
        if offset >= self.logical_size {
            return Ok(Vec::new());
        }
        let end = offset + length.min(self.logical_size - offset);
        let page_size = self.ftl.geometry().page_size;

        let mut out = Vec::with_capacity(end - offset);
        let mut pos = offset;
        while pos < end {
            let (lba, start) = div_rem(pos, page_size);
            let len = (page_size - start).min(end - pos);
            let page = self.ftl.ftl_read(lba)?;
            out.extend_from_slice(&page[start..start + len]);
            pos += len;
        }
        Ok(out)
    }

    fn write_chunk(&mut self, lba: Lba, start: usize, chunk: &[u8]) -> Result<()> {
        if start == 0 && chunk.len() == self.ftl.geometry().page_size {
            return self.ftl.ftl_write(lba, chunk);
        }
        let mut page = self.ftl.ftl_read(lba)?;
        page[start..start + chunk.len()].copy_from_slice(chunk);
        self.ftl.ftl_write(lba, &page)
    }

    /// Writes `data` at `offset`, growing the volume as needed.
    ///
    /// Pages are committed one by one. If a page fails after others were
    /// committed, the byte count written so far is returned; if the very first
    /// page fails, the error is.
    pub fn write(&mut self, offset: Addr, data: &[u8]) -> Result<usize> {
        let end = offset.checked_add(data.len()).ok_or(FtlError::CapacityExceeded {
            requested: usize::MAX,
            capacity: self.capacity(),
        })?;
        self.expand(end)?;

        let page_size = self.ftl.geometry().page_size;
        let mut done = 0;
        while done < data.len() {
            let (lba, start) = div_rem(offset + done, page_size);
            let len = (page_size - start).min(data.len() - done);

            if let Err(e) = self.write_chunk(lba, start, &data[done..done + len]) {
                if done == 0 {
                    return Err(e);
                }
                warn!("Short write at offset {}: {} of {} bytes, {}", offset, done, data.len(), e);
                return Ok(done);
            }
            done += len;
            self.host_bytes_written += len;
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use rand::prelude::*;

    use super::*;
    use crate::error::NandError;
    use crate::mapping::Pca;
    use crate::nand::{MemNand, NandResult};

    fn ssd(geometry: Geometry) -> Ssd<MemNand> {
        Ssd::new(geometry, MemNand::new(geometry)).unwrap()
    }

    /// Medium that wears out after a fixed number of page programs.
    struct WornNand {
        inner: MemNand,
        writes_left: usize,
    }

    impl NandMedia for WornNand {
        fn read_page(&self, block: BlockId, page: PageId, buf: &mut [u8]) -> NandResult<()> {
            self.inner.read_page(block, page, buf)
        }

        fn write_page(&mut self, block: BlockId, page: PageId, buf: &[u8]) -> NandResult<()> {
            if self.writes_left == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "worn out").into());
            }
            self.writes_left -= 1;
            self.inner.write_page(block, page, buf)
        }

        fn erase_block(&mut self, block: BlockId) -> NandResult<()> {
            self.inner.erase_block(block)
        }
    }

    #[test]
    fn overwrite_reads_latest_and_stales_old_page() {
        let g = Geometry::new(512, 2, 3, 2);
        let mut dev = ssd(g);

        assert_eq!(dev.write(0, &[b'A'; 512]).unwrap(), 512);
        assert_eq!(dev.write(0, &[b'B'; 512]).unwrap(), 512);
        assert_eq!(dev.read(0, 512).unwrap(), vec![b'B'; 512]);

        let block = dev.ftl().block(0);
        assert!(block.is_stale_page(0));
        assert_eq!(block.valid_counter(), 1);
        assert_eq!(dev.ftl().lookup(0), Some(Pca::new(0, 1)));
    }

    #[test]
    fn read_is_clamped_to_logical_size() {
        let g = Geometry::new(512, 2, 3, 2);
        let mut dev = ssd(g);
        dev.write(0, &[7; 700]).unwrap();
        assert_eq!(dev.logical_size(), 700);

        assert!(dev.read(700, 10).unwrap().is_empty());
        assert!(dev.read(5000, 10).unwrap().is_empty());
        assert_eq!(dev.read(600, 512).unwrap(), vec![7; 100]);
        assert_eq!(dev.read(0, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn unaligned_write_spanning_several_pages() {
        let g = Geometry::new(16, 4, 6, 16);
        let mut dev = ssd(g);
        dev.reset(g.logical_capacity()).unwrap();
        dev.write(0, &[1; 64]).unwrap();

        let data: Vec<u8> = (0..40).collect();
        assert_eq!(dev.write(5, &data).unwrap(), 40);

        let back = dev.read(0, 64).unwrap();
        assert_eq!(&back[..5], &[1; 5]);
        assert_eq!(&back[5..45], &data[..]);
        assert_eq!(&back[45..], &[1; 19]);

        // Head and tail pages were read-modify-written, the middle page went straight through.
        assert_eq!(dev.physical_pages_written(), 4 + 3);
    }

    #[test]
    fn untouched_bytes_read_as_zero() {
        let g = Geometry::new(16, 4, 6, 16);
        let mut dev = ssd(g);
        dev.write(20, &[9; 4]).unwrap();

        let back = dev.read(0, 24).unwrap();
        assert_eq!(&back[..20], &[0; 20]);
        assert_eq!(&back[20..], &[9; 4]);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let g = Geometry::new(512, 2, 3, 2);
        let mut dev = ssd(g);
        dev.write(0, &[3; 10]).unwrap();
        let before = dev.stats();

        assert!(matches!(dev.write(1000, &[0; 100]), Err(FtlError::CapacityExceeded { capacity: 1024, .. })));
        assert!(matches!(dev.write(usize::MAX, &[0; 2]), Err(FtlError::CapacityExceeded { .. })));
        assert!(matches!(dev.reset(1025), Err(FtlError::CapacityExceeded { requested: 1025, .. })));
        assert_eq!(dev.stats(), before);
        assert_eq!(dev.read(0, 10).unwrap(), vec![3; 10]);

        assert_eq!(dev.write(1000, &[4; 24]).unwrap(), 24);
        assert_eq!(dev.logical_size(), 1024);
    }

    #[test]
    fn reset_drops_data_but_keeps_lifetime_counters() {
        let g = Geometry::new(16, 4, 6, 16);
        let mut dev = ssd(g);
        dev.write(0, &[5; 100]).unwrap();
        let written = dev.physical_pages_written();

        dev.reset(32).unwrap();
        assert_eq!(dev.logical_size(), 32);
        assert_eq!(dev.read(0, 32).unwrap(), vec![0; 32]);
        assert_eq!(dev.physical_pages_written(), written);
        assert_eq!(dev.ftl().free_blocks(), 6);
    }

    #[test]
    fn short_write_when_media_fails_midway() {
        let g = Geometry::new(16, 4, 4, 8);
        let media = WornNand { inner: MemNand::new(g), writes_left: 2 };
        let mut dev = Ssd::new(g, media).unwrap();

        assert_eq!(dev.write(0, &[7; 48]).unwrap(), 32);
        let back = dev.read(0, 48).unwrap();
        assert_eq!(&back[..32], &[7; 32]);
        assert_eq!(&back[32..], &[0; 16]);

        assert!(matches!(dev.write(0, &[8; 16]), Err(FtlError::Nand(NandError::Io(_)))));
        assert_eq!(dev.read(0, 16).unwrap(), vec![7; 16]);
        dev.ftl().check_consistency().unwrap();
    }

    #[test]
    fn write_amplification_starts_undefined_and_stays_above_one() {
        let g = Geometry::new(16, 4, 6, 16);
        let mut dev = ssd(g);
        assert_eq!(dev.write_amplification(), None);

        dev.write(3, &[1; 5]).unwrap();
        assert_eq!(dev.write_amplification(), Some(16.0 / 5.0));
    }

    #[test]
    fn file_backed_volume_through_gc() {
        let dir = tempfile::tempdir().unwrap();
        let g = Geometry::new(32, 4, 5, 12);
        let mut dev = Ssd::new(g, crate::nand::FileNand::create(dir.path(), g).unwrap()).unwrap();

        for round in 0..6u8 {
            for lba in 0..12 {
                dev.write(lba * 32, &[round ^ lba as u8; 32]).unwrap();
            }
        }
        for lba in 0..12 {
            assert_eq!(dev.read(lba * 32, 32).unwrap(), vec![5 ^ lba as u8; 32]);
        }
        assert!(dev.stats().victims_erased > 0);
        dev.ftl().check_consistency().unwrap();
    }

    #[test]
    fn random_workload_matches_shadow_copy() {
        let g = Geometry::new(64, 8, 12, 80);
        let mut dev = ssd(g);
        let cap = dev.capacity();
        dev.reset(cap).unwrap();

        let mut shadow = vec![0u8; cap];
        let mut rng = SmallRng::seed_from_u64(7);

        for op in 0..3000 {
            let offset = rng.gen_range(0..cap);
            let len = rng.gen_range(1..=200).min(cap - offset);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            assert_eq!(dev.write(offset, &data).unwrap(), len);
            shadow[offset..offset + len].copy_from_slice(&data);

            if op % 100 == 0 {
                let at = rng.gen_range(0..cap);
                let n = rng.gen_range(0..300);
                let end = (at + n).min(cap);
                assert_eq!(dev.read(at, n).unwrap(), &shadow[at..end]);
                dev.ftl().check_consistency().unwrap();
            }
        }

        assert_eq!(dev.read(0, cap).unwrap(), shadow);
        let stats = dev.stats();
        assert!(stats.gc_runs > 0);
        assert!(stats.nand_bytes_written >= stats.host_bytes_written);
        assert!(stats.write_amplification.unwrap() >= 1.0);
    }
}
