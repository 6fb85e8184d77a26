//! Per-HARQ-process softbuffer
//!
//! A softbuffer owns the codeblocks of one transport block while it is being
//! received, so that retransmissions land in the same memory and their LLRs
//! can be soft-combined.
//!
//! ```text
//!              reserve              lock
//!  Available ----------> Reserved -------> Locked
//!      ^                  |  ^  <--------   |
//!      |   run_slot       |  |   unlock     | release
//!      |   (expired)      |  |              v
//!      +------------------+  +--------- Released
//!      ^                       release     |
//!      +-------------------------------------+
//!                   run_slot
//! ```

use super::codeblock_pool::{CodeblockId, CodeblockPool};
use super::{SoftbufferId, SoftbufferState, SoftbufferStatus};
use common::types::{LogLikelihoodRatio, SlotPoint};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, trace};

/// Raw value of the identity mirror before the first reservation
const NO_RESERVATION: u32 = 0;

#[derive(Debug)]
struct SoftbufferInner {
    state: SoftbufferState,
    reservation_id: Option<SoftbufferId>,
    expire_slot: Option<SlotPoint>,
    codeblock_ids: Vec<CodeblockId>,
    crc: Vec<bool>,
    /// Last successful reservation kept the codeblocks of the previous one
    reused: bool,
}

impl SoftbufferInner {
    fn free_codeblocks(&mut self, codeblocks: &CodeblockPool) {
        for id in self.codeblock_ids.drain(..) {
            codeblocks.free(id);
        }
        self.crc.clear();
    }
}

/// Receive softbuffer of one HARQ process
pub struct Softbuffer {
    /// Lock-free mirror of `reservation_id` for identifier matching
    id_mirror: AtomicU32,
    inner: Mutex<SoftbufferInner>,
}

impl Softbuffer {
    /// Create an available softbuffer without codeblocks
    pub fn new() -> Self {
        Self {
            id_mirror: AtomicU32::new(NO_RESERVATION),
            inner: Mutex::new(SoftbufferInner {
                state: SoftbufferState::Available,
                reservation_id: None,
                expire_slot: None,
                codeblock_ids: Vec::new(),
                crc: Vec::new(),
                reused: false,
            }),
        }
    }

    /// Reserve the buffer for `id` until `expire_slot` with `nof_codeblocks` codeblocks.
    ///
    /// A buffer keeps its codeblocks when the count does not change, which is
    /// what lets a retransmission combine with the previous transmissions.
    pub fn reserve(
        &self,
        id: SoftbufferId,
        expire_slot: SlotPoint,
        nof_codeblocks: usize,
        codeblocks: &CodeblockPool,
    ) -> SoftbufferStatus {
        let mut inner = self.inner.lock();

        match inner.state {
            SoftbufferState::Locked => return SoftbufferStatus::AlreadyInUse,
            SoftbufferState::Reserved | SoftbufferState::Released
                if inner.reservation_id != Some(id) =>
            {
                // Another identifier won the race for this buffer
                return SoftbufferStatus::AlreadyInUse;
            }
            _ => {}
        }

        inner.reservation_id = Some(id);
        inner.expire_slot = Some(expire_slot);
        self.id_mirror.store(id.to_raw(), Ordering::Release);

        if inner.codeblock_ids.len() == nof_codeblocks {
            inner.state = SoftbufferState::Reserved;
            inner.reused = true;
            return SoftbufferStatus::Successful;
        }

        inner.free_codeblocks(codeblocks);
        for _ in 0..nof_codeblocks {
            match codeblocks.reserve() {
                Some(cb) => inner.codeblock_ids.push(cb),
                None => {
                    inner.free_codeblocks(codeblocks);
                    inner.state = SoftbufferState::Available;
                    trace!(
                        "Softbuffer for {} needs {} codeblocks, pool exhausted",
                        id,
                        nof_codeblocks
                    );
                    return SoftbufferStatus::InsufficientCodeblocks;
                }
            }
        }

        inner.crc.resize(nof_codeblocks, false);
        inner.state = SoftbufferState::Reserved;
        inner.reused = false;
        SoftbufferStatus::Successful
    }

    /// Reclaim the buffer if it was released or its reservation expired.
    ///
    /// Returns whether the buffer is available afterwards.
    pub fn run_slot(&self, now: SlotPoint, codeblocks: &CodeblockPool) -> bool {
        let mut inner = self.inner.lock();

        let expired = inner.state == SoftbufferState::Reserved
            && inner.expire_slot.map_or(false, |expire| expire <= now);

        if expired {
            debug!(
                "Softbuffer for {:?} expired at {} ({} codeblocks)",
                inner.reservation_id,
                now,
                inner.codeblock_ids.len()
            );
        }

        if expired || inner.state == SoftbufferState::Released {
            inner.free_codeblocks(codeblocks);
            inner.state = SoftbufferState::Available;
        }

        inner.state == SoftbufferState::Available
    }

    /// Whether the last reservation was made for `id`. Does not take the state lock.
    pub fn match_id(&self, id: SoftbufferId) -> bool {
        self.id_mirror.load(Ordering::Acquire) == id.to_raw()
    }

    /// Mark the buffer as being decoded
    pub fn lock(&self) {
        let mut inner = self.inner.lock();
        assert_eq!(
            inner.state,
            SoftbufferState::Reserved,
            "Only reserved softbuffers can be locked"
        );
        inner.state = SoftbufferState::Locked;
    }

    /// Return a locked buffer to reserved, keeping its contents for a retransmission
    pub fn unlock(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SoftbufferState::Locked {
            inner.state = SoftbufferState::Reserved;
        }
    }

    /// Retire the buffer. Codeblocks go back to the pool on the next slot.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        assert!(
            matches!(inner.state, SoftbufferState::Reserved | SoftbufferState::Locked),
            "Cannot release a softbuffer in state {:?}",
            inner.state
        );
        inner.state = SoftbufferState::Released;
    }

    /// Clear every codeblock CRC flag
    pub fn reset_codeblocks_crc(&self) {
        self.inner.lock().crc.fill(false);
    }

    /// Codeblock CRC flags, one per codeblock
    pub fn codeblocks_crc(&self) -> MappedMutexGuard<'_, [bool]> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.crc[..])
    }

    /// First `size` soft bits of codeblock `index`
    pub fn codeblock_soft_bits<'a>(
        &self,
        index: usize,
        size: usize,
        codeblocks: &'a CodeblockPool,
    ) -> MappedMutexGuard<'a, [LogLikelihoodRatio]> {
        let id = self.codeblock_id(index);
        assert!(
            size <= codeblocks.max_codeblock_size(),
            "Soft bit view of {} exceeds codeblock size {}",
            size,
            codeblocks.max_codeblock_size()
        );
        MappedMutexGuard::map(codeblocks.soft_bits(id), |bits| &mut bits[..size])
    }

    /// First `size` data bits of codeblock `index`
    pub fn codeblock_data_bits<'a>(
        &self,
        index: usize,
        size: usize,
        codeblocks: &'a CodeblockPool,
    ) -> MappedMutexGuard<'a, [u8]> {
        let id = self.codeblock_id(index);
        assert!(
            size <= codeblocks.max_data_bits(),
            "Data bit view of {} exceeds codeblock capacity {}",
            size,
            codeblocks.max_data_bits()
        );
        MappedMutexGuard::map(codeblocks.data_bits(id), |bits| &mut bits[..size])
    }

    fn codeblock_id(&self, index: usize) -> CodeblockId {
        let inner = self.inner.lock();
        assert!(
            index < inner.codeblock_ids.len(),
            "Codeblock index {} out of range, softbuffer holds {}",
            index,
            inner.codeblock_ids.len()
        );
        inner.codeblock_ids[index]
    }

    /// Current state
    pub fn state(&self) -> SoftbufferState {
        self.inner.lock().state
    }

    /// Whether the buffer can take a new reservation
    pub fn is_available(&self) -> bool {
        self.state() == SoftbufferState::Available
    }

    /// Number of codeblocks held
    pub fn nof_codeblocks(&self) -> usize {
        self.inner.lock().codeblock_ids.len()
    }

    /// Codeblocks held, in codeblock order
    pub fn codeblock_ids(&self) -> Vec<CodeblockId> {
        self.inner.lock().codeblock_ids.clone()
    }

    /// Identifier of the last reservation
    pub fn reservation_id(&self) -> Option<SoftbufferId> {
        self.inner.lock().reservation_id
    }

    /// Slot at which an unlocked reservation is reclaimed
    pub fn expire_slot(&self) -> Option<SlotPoint> {
        self.inner.lock().expire_slot
    }

    /// Whether the last reservation kept the previously held codeblocks
    pub fn reused_codeblocks(&self) -> bool {
        self.inner.lock().reused
    }
}

impl Default for Softbuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle to a reserved softbuffer, returned by the pool.
///
/// Views returned by this handle are lock guards borrowed from the handle.
/// At most one soft bit view and one data bit view of the same codeblock can
/// be held at a time. Drop them before changing the buffer state.
///
/// Dropping a handle that locked the buffer unlocks it, so an abandoned decode
/// leaves the buffer reserved for the retransmission. A handle that never
/// locked, or already unlocked or released, leaves the state untouched.
pub struct UniqueSoftbuffer<'a> {
    buffer: &'a Softbuffer,
    codeblocks: &'a CodeblockPool,
    id: SoftbufferId,
    locked: bool,
}

impl<'a> UniqueSoftbuffer<'a> {
    pub(super) fn new(buffer: &'a Softbuffer, codeblocks: &'a CodeblockPool, id: SoftbufferId) -> Self {
        Self {
            buffer,
            codeblocks,
            id,
            locked: false,
        }
    }

    /// Identifier the buffer was reserved for
    pub fn id(&self) -> SoftbufferId {
        self.id
    }

    /// Current state of the underlying buffer
    pub fn state(&self) -> SoftbufferState {
        self.buffer.state()
    }

    /// Number of codeblocks reserved
    pub fn nof_codeblocks(&self) -> usize {
        self.buffer.nof_codeblocks()
    }

    /// Whether the codeblocks still hold the soft bits of earlier transmissions
    pub fn reused_codeblocks(&self) -> bool {
        self.buffer.reused_codeblocks()
    }

    /// Start decoding
    pub fn lock(&mut self) {
        self.buffer.lock();
        self.locked = true;
    }

    /// Decoding failed, keep the buffer for the next retransmission
    pub fn unlock(&mut self) {
        if self.locked {
            self.locked = false;
            self.buffer.unlock();
        }
    }

    /// Decoding succeeded, the buffer is reclaimed on the next slot.
    ///
    /// Consumes the handle: once released the buffer may be handed to another
    /// identifier and this handle must not touch it again.
    pub fn release(mut self) {
        self.locked = false;
        self.buffer.release();
    }

    /// Clear the codeblock CRC flags
    pub fn reset_codeblocks_crc(&mut self) {
        self.buffer.reset_codeblocks_crc();
    }

    /// Codeblock CRC flags
    pub fn codeblocks_crc(&mut self) -> MappedMutexGuard<'_, [bool]> {
        self.buffer.codeblocks_crc()
    }

    /// Soft bits of codeblock `index`
    pub fn codeblock_soft_bits(&self, index: usize, size: usize) -> MappedMutexGuard<'_, [LogLikelihoodRatio]> {
        self.buffer.codeblock_soft_bits(index, size, self.codeblocks)
    }

    /// Data bits of codeblock `index`
    pub fn codeblock_data_bits(&self, index: usize, size: usize) -> MappedMutexGuard<'_, [u8]> {
        self.buffer.codeblock_data_bits(index, size, self.codeblocks)
    }
}

impl Drop for UniqueSoftbuffer<'_> {
    fn drop(&mut self) {
        if self.locked {
            self.buffer.unlock();
        }
    }
}
