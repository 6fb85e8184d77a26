//! Codeblock storage shared by every softbuffer of a pool
//!
//! A flat set of fixed-capacity codeblock slots. Each slot holds the soft bits
//! (LLRs) of one LDPC codeword and the decoded data bits. Slots are claimed
//! first-fit with an atomic flag and referenced by index.
//!
//! Freeing a slot never clears its contents. The next owner must overwrite the
//! soft bits before combining into them.

use common::types::LogLikelihoodRatio;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

/// Index of a codeblock slot in a [`CodeblockPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeblockId(usize);

impl CodeblockId {
    /// Slot index within the pool
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Fixed-size pool of codeblock buffers
pub struct CodeblockPool {
    reserved: Vec<AtomicBool>,
    soft_bits: Vec<Mutex<Box<[LogLikelihoodRatio]>>>,
    data_bits: Vec<Mutex<Box<[u8]>>>,
    max_codeblock_size: usize,
    max_data_bits: usize,
}

impl CodeblockPool {
    /// Create a pool of `nof_codeblocks` slots holding up to `max_codeblock_size` soft bits each.
    ///
    /// The data bit buffer of each slot is a third of the codeword size, the
    /// lowest LDPC code rate bounding the decoded payload.
    pub fn new(nof_codeblocks: usize, max_codeblock_size: usize) -> Self {
        let max_data_bits = (max_codeblock_size + 2) / 3;

        Self {
            reserved: (0..nof_codeblocks).map(|_| AtomicBool::new(false)).collect(),
            soft_bits: (0..nof_codeblocks)
                .map(|_| Mutex::new(vec![LogLikelihoodRatio::ZERO; max_codeblock_size].into_boxed_slice()))
                .collect(),
            data_bits: (0..nof_codeblocks)
                .map(|_| Mutex::new(vec![0u8; max_data_bits].into_boxed_slice()))
                .collect(),
            max_codeblock_size,
            max_data_bits,
        }
    }

    /// Claim the first free codeblock, `None` when the pool is exhausted
    pub fn reserve(&self) -> Option<CodeblockId> {
        self.reserved
            .iter()
            .position(|flag| {
                flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            })
            .map(CodeblockId)
    }

    /// Return a codeblock to the pool. The buffers keep their contents.
    pub fn free(&self, id: CodeblockId) {
        let was_reserved = self.reserved[id.0].swap(false, Ordering::AcqRel);
        assert!(was_reserved, "Codeblock {} freed while not reserved", id.0);
    }

    /// Whether a codeblock is currently reserved
    pub fn is_reserved(&self, id: CodeblockId) -> bool {
        self.reserved[id.0].load(Ordering::Acquire)
    }

    /// Soft bits of a reserved codeblock
    pub fn soft_bits(&self, id: CodeblockId) -> MappedMutexGuard<'_, [LogLikelihoodRatio]> {
        assert!(self.is_reserved(id), "Soft bits of unreserved codeblock {} requested", id.0);
        MutexGuard::map(self.soft_bits[id.0].lock(), |bits| &mut bits[..])
    }

    /// Data bits of a reserved codeblock, one bit per element
    pub fn data_bits(&self, id: CodeblockId) -> MappedMutexGuard<'_, [u8]> {
        assert!(self.is_reserved(id), "Data bits of unreserved codeblock {} requested", id.0);
        MutexGuard::map(self.data_bits[id.0].lock(), |bits| &mut bits[..])
    }

    /// Total number of codeblock slots
    pub fn capacity(&self) -> usize {
        self.reserved.len()
    }

    /// Number of unreserved slots. Approximate under concurrent use.
    pub fn nof_free_codeblocks(&self) -> usize {
        self.reserved
            .iter()
            .filter(|flag| !flag.load(Ordering::Acquire))
            .count()
    }

    /// Soft bit capacity of each slot
    pub fn max_codeblock_size(&self) -> usize {
        self.max_codeblock_size
    }

    /// Data bit capacity of each slot
    pub fn max_data_bits(&self) -> usize {
        self.max_data_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_first_fit() {
        let pool = CodeblockPool::new(3, 30);
        assert_eq!(pool.max_data_bits(), 10);

        let a = pool.reserve().unwrap();
        let b = pool.reserve().unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));

        pool.free(a);
        assert_eq!(pool.reserve().unwrap().index(), 0);
        assert_eq!(pool.nof_free_codeblocks(), 1);
    }

    #[test]
    fn test_reserve_exhausted() {
        let pool = CodeblockPool::new(2, 16);
        assert!(pool.reserve().is_some());
        assert!(pool.reserve().is_some());
        assert!(pool.reserve().is_none());
        assert_eq!(pool.nof_free_codeblocks(), 0);
    }

    #[test]
    #[should_panic(expected = "freed while not reserved")]
    fn test_double_free_panics() {
        let pool = CodeblockPool::new(1, 16);
        let id = pool.reserve().unwrap();
        pool.free(id);
        pool.free(id);
    }

    #[test]
    #[should_panic(expected = "unreserved codeblock")]
    fn test_soft_bits_of_free_codeblock_panics() {
        let pool = CodeblockPool::new(1, 16);
        let id = pool.reserve().unwrap();
        pool.free(id);
        let _ = pool.soft_bits(id);
    }

    #[test]
    fn test_free_keeps_contents() {
        let pool = CodeblockPool::new(1, 8);
        let id = pool.reserve().unwrap();
        pool.soft_bits(id).fill(LogLikelihoodRatio::new(-7));
        pool.data_bits(id)[0] = 1;
        pool.free(id);

        // Same slot comes back with the previous owner's contents
        let again = pool.reserve().unwrap();
        assert_eq!(again, id);
        assert!(pool.soft_bits(again).iter().all(|llr| llr.value() == -7));
        assert_eq!(pool.data_bits(again)[0], 1);
    }
}
