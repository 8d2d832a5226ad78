use std::fmt;

use crate::config::{BlockId, Geometry, Lba, PageId};

/// Physical chunk address: one page inside one erase block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pca {
    pub block: BlockId,
    pub page: PageId,
}

impl Pca {
    pub fn new(block: BlockId, page: PageId) -> Self {
        Pca { block, page }
    }

    /// Range-checked construction.
    pub fn checked(geometry: &Geometry, block: BlockId, page: PageId) -> Option<Self> {
        (block < geometry.blocks && page < geometry.pages_per_block).then_some(Pca { block, page })
    }

    /// Flat page index, used to address the P2L table.
    pub fn index(&self, pages_per_block: usize) -> usize {
        self.block * pages_per_block + self.page
    }
}

impl fmt::Display for Pca {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.page)
    }
}

/// Forward (L2P) and reverse (P2L) translation tables.
pub struct MappingTable {
    l2p: Vec<Option<Pca>>,
    p2l: Vec<Option<Lba>>,
    pages_per_block: usize,
}

impl MappingTable {
    pub fn new(geometry: &Geometry) -> Self {
        MappingTable {
            l2p: vec![None; geometry.logical_pages],
            p2l: vec![None; geometry.all_pages()],
            pages_per_block: geometry.pages_per_block,
        }
    }

    pub fn logical_pages(&self) -> usize {
        self.l2p.len()
    }

    pub fn lookup(&self, lba: Lba) -> Option<Pca> {
        self.l2p[lba]
    }

    pub fn owner(&self, pca: Pca) -> Option<Lba> {
        self.p2l[pca.index(self.pages_per_block)]
    }

    /// Points `lba` at `pca` and returns the address it used to map to.
    /// The reverse entry of the old address is cleared.
    pub fn remap(&mut self, lba: Lba, pca: Pca) -> Option<Pca> {
        let old = self.l2p[lba].replace(pca);
        self.p2l[pca.index(self.pages_per_block)] = Some(lba);
        if let Some(old) = old {
            self.p2l[old.index(self.pages_per_block)] = None;
        }
        old
    }

    pub fn mapped(&self) -> usize {
        self.l2p.iter().filter(|e| e.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.l2p.fill(None);
        self.p2l.fill(None);
    }

    /// Every mapped LBA is named by exactly its own reverse entry and vice versa.
    pub fn is_consistent(&self) -> bool {
        let forward = self.l2p.iter().enumerate().all(|(lba, pca)| match pca {
            Some(pca) => self.owner(*pca) == Some(lba),
            None => true,
        });
        let reverse = self.p2l.iter().filter(|e| e.is_some()).count() == self.mapped();
        forward && reverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pca_is_range_checked() {
        let pca = Pca::new(12, 9);
        assert_eq!(pca.to_string(), "12:9");
        assert_eq!(pca.index(10), 129);

        let g = Geometry::default();
        assert!(Pca::checked(&g, 12, 9).is_some());
        assert!(Pca::checked(&g, 13, 0).is_none());
        assert!(Pca::checked(&g, 0, 10).is_none());
    }

    #[test]
    fn remap_keeps_reverse_table_in_sync() {
        let g = Geometry::new(512, 2, 3, 2);
        let mut table = MappingTable::new(&g);
        assert_eq!(table.lookup(1), None);

        assert_eq!(table.remap(1, Pca::new(0, 0)), None);
        assert_eq!(table.owner(Pca::new(0, 0)), Some(1));

        assert_eq!(table.remap(1, Pca::new(0, 1)), Some(Pca::new(0, 0)));
        assert_eq!(table.owner(Pca::new(0, 0)), None);
        assert_eq!(table.owner(Pca::new(0, 1)), Some(1));
        assert_eq!(table.mapped(), 1);
        assert!(table.is_consistent());

        table.clear();
        assert_eq!(table.mapped(), 0);
        assert_eq!(table.owner(Pca::new(0, 1)), None);
    }
}
