use crate::config::{BlockId, Counter, PageId};

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-length bitmap, one bit per page of a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBitmap {
    words: Vec<u64>,
    len: usize,
}

impl PageBitmap {
    pub fn empty(len: usize) -> Self {
        PageBitmap { words: vec![0; len.div_ceil(WORD_BITS)], len }
    }

    pub fn full(len: usize) -> Self {
        let mut out = PageBitmap::empty(len);
        out.fill();
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit {} out of range {}", idx, self.len);
        self.words[idx / WORD_BITS] & (1 << (idx % WORD_BITS)) != 0
    }

    pub fn set(&mut self, idx: usize) {
        assert!(idx < self.len, "bit {} out of range {}", idx, self.len);
        self.words[idx / WORD_BITS] |= 1 << (idx % WORD_BITS);
    }

    pub fn clear(&mut self, idx: usize) {
        assert!(idx < self.len, "bit {} out of range {}", idx, self.len);
        self.words[idx / WORD_BITS] &= !(1 << (idx % WORD_BITS));
    }

    pub fn fill(&mut self) {
        self.words.fill(u64::MAX);
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1 << tail) - 1;
            }
        }
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn first_set(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * WORD_BITS + w.trailing_zeros() as usize)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Free,
    /// Receiving writes from the host allocator or the GC relocation cursor.
    Open,
    /// No free page left.
    Closed,
}

/// Per-block bookkeeping. Every page is exactly one of free, stale or valid.
#[derive(Clone, Debug)]
pub struct Block {
    block_id: BlockId,
    free: PageBitmap,
    stale: PageBitmap,
    valid_counter: Counter,
    erase_counter: Counter,
    status: BlockStatus,
}

impl Block {
    pub fn new(block_id: BlockId, pages: usize) -> Self {
        Block {
            block_id,
            free: PageBitmap::full(pages),
            stale: PageBitmap::empty(pages),
            valid_counter: 0,
            erase_counter: 0,
            status: BlockStatus::Free,
        }
    }

    pub fn id(&self) -> BlockId {
        self.block_id
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    pub fn pages(&self) -> usize {
        self.free.len()
    }

    pub fn valid_counter(&self) -> Counter {
        self.valid_counter
    }

    pub fn erase_counter(&self) -> Counter {
        self.erase_counter
    }

    pub fn free_counter(&self) -> Counter {
        self.free.count_ones()
    }

    pub fn stale_counter(&self) -> Counter {
        self.stale.count_ones()
    }

    pub fn is_free_page(&self, page: PageId) -> bool {
        self.free.get(page)
    }

    pub fn is_stale_page(&self, page: PageId) -> bool {
        self.stale.get(page)
    }

    pub fn is_valid_page(&self, page: PageId) -> bool {
        !self.free.get(page) && !self.stale.get(page)
    }

    /// Pages holding live data, in ascending order.
    pub fn valid_pages(&self) -> impl Iterator<Item = PageId> + '_ {
        (0..self.pages()).filter(move |&p| self.is_valid_page(p))
    }

    pub fn first_free_page(&self) -> Option<PageId> {
        self.free.first_set()
    }

    pub fn open(&mut self) {
        debug_assert_eq!(self.status, BlockStatus::Free, "opening block {} that is not free", self.block_id);
        self.status = BlockStatus::Open;
    }

    pub fn close(&mut self) {
        debug_assert!(self.first_free_page().is_none(), "closing block {} with free pages", self.block_id);
        self.status = BlockStatus::Closed;
    }

    /// Stops accepting writes while pages are still free. Only used right before an erase.
    pub fn seal(&mut self) {
        self.status = BlockStatus::Closed;
    }

    /// Marks a free page as holding live data.
    pub fn program(&mut self, page: PageId) {
        debug_assert!(self.free.get(page), "page {}:{} programmed twice without erase", self.block_id, page);
        self.free.clear(page);
        self.valid_counter += 1;
    }

    /// Marks a valid page as superseded.
    pub fn invalidate(&mut self, page: PageId) {
        debug_assert!(self.is_valid_page(page), "page {}:{} is not valid", self.block_id, page);
        self.stale.set(page);
        self.valid_counter -= 1;
    }

    pub fn erase(&mut self) {
        self.free.fill();
        self.stale.clear_all();
        self.valid_counter = 0;
        self.erase_counter += 1;
        self.status = BlockStatus::Free;
    }

    /// Checks that free, stale and valid partition the block.
    pub fn is_consistent(&self) -> bool {
        let overlap = (0..self.pages()).any(|p| self.free.get(p) && self.stale.get(p));
        !overlap && self.valid_counter + self.stale_counter() + self.free_counter() == self.pages()
    }
}
