//! Lock-free SPMC (Single Producer, Multiple Consumer) timing event stream.
//!
//! All keying, paddle and gap events flow from the RT thread through here to
//! the decoder, sidetone and UI consumers.
//!
//! # Architecture
//!
//! ```text
//! RT thread ──push──▶ TimingStream ──poll(cursor)──▶ Consumers
//!                     [slots; N]      one read index per
//!                     write_idx       pre-allocated cursor slot
//! ```
//!
//! # Rules
//!
//! - `push` never blocks, never allocates and never reads consumer state
//! - Each consumer owns one cursor; overrun is detected lazily, on that
//!   consumer's own `poll`
//! - An overrun is a gap, never a reordering: after it, delivery resumes
//!   from the oldest event still in the ring
//! - Only atomic operations for synchronization, no `unsafe`
//!
//! # Memory Ordering
//!
//! Each slot carries a stamp holding the logical index it was committed for.
//! The producer marks the slot as being rewritten (stamp = `w + 1`, which
//! never maps to this slot), issues a Release fence, stores the payload and
//! commits with stamp = `w` (Release). A consumer loads the stamp (Acquire),
//! the payload, an Acquire fence, then the stamp again: any mismatch means
//! the producer lapped it mid-copy and the event is counted as lost.

use core::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};

use crate::event::{EventKind, TimingEvent};

/// Default stream size: 1024 events.
pub const DEFAULT_STREAM_SIZE: usize = 1024;

/// Default number of consumer cursors.
pub const DEFAULT_MAX_CONSUMERS: usize = 4;

/// Stream errors returned to consumer-side callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Every consumer slot is in use.
    #[error("consumer capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },
    /// Cursor does not belong to a live registration on this stream.
    #[error("unknown or stale consumer cursor")]
    UnknownCursor,
}

/// 64-bit counter over two 32-bit atomics (the ESP32 targets have no
/// 64-bit atomics). Single writer, any number of readers.
struct SplitU64 {
    seq: AtomicU32,
    hi: AtomicU32,
    lo: AtomicU32,
}

impl SplitU64 {
    const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            hi: AtomicU32::new(0),
            lo: AtomicU32::new(0),
        }
    }

    fn get(&self) -> u64 {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }
            let hi = self.hi.load(Ordering::Relaxed);
            let lo = self.lo.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == s1 {
                return (u64::from(hi) << 32) | u64::from(lo);
            }
        }
    }

    /// Writer only.
    fn set(&self, value: u64) {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.hi.store((value >> 32) as u32, Ordering::Relaxed);
        self.lo.store(value as u32, Ordering::Relaxed);
        self.seq.store(s.wrapping_add(2), Ordering::Release);
    }

    /// Writer only.
    fn add(&self, n: u32) {
        // Single writer: our own last value is always current.
        let hi = self.hi.load(Ordering::Relaxed);
        let lo = self.lo.load(Ordering::Relaxed);
        let value = (u64::from(hi) << 32) | u64::from(lo);
        self.set(value.saturating_add(u64::from(n)));
    }
}

/// One ring entry. Atomics only, so a racing copy is never UB, only stale.
struct Slot {
    stamp: AtomicU32,
    ts_lo: AtomicU32,
    ts_hi: AtomicU32,
    word: AtomicU32,
}

impl Slot {
    const fn new() -> Self {
        Self {
            stamp: AtomicU32::new(u32::MAX),
            ts_lo: AtomicU32::new(0),
            ts_hi: AtomicU32::new(0),
            word: AtomicU32::new(0),
        }
    }
}

/// Pre-allocated consumer cursor slot.
struct ConsumerSlot {
    in_use: AtomicBool,
    /// Bumped on every unregistration so a stale cursor is recognised.
    ticket: AtomicU32,
    read_idx: AtomicU32,
    overrun: SplitU64,
}

impl ConsumerSlot {
    const fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            ticket: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            overrun: SplitU64::new(),
        }
    }
}

/// Handle to a registered consumer cursor.
///
/// Move-only: `poll` takes it by `&mut`, so one cursor is drained by one
/// thread at a time.
#[derive(Debug, PartialEq, Eq)]
pub struct CursorId {
    slot: usize,
    ticket: u32,
}

impl CursorId {
    /// Index of the consumer slot (for diagnostics displays).
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Lock-free SPMC ring buffer of [`TimingEvent`]s.
///
/// `N` (capacity) must be a power of two ≥ 2; `C` is the fixed number of
/// consumer cursors. Both are checked at compile time.
///
/// Single producer: `push` is only called from the RT thread (enforced by
/// design, not by the type system). Misuse cannot cause undefined
/// behaviour, only lost events.
pub struct TimingStream<const N: usize = DEFAULT_STREAM_SIZE, const C: usize = DEFAULT_MAX_CONSUMERS> {
    slots: [Slot; N],
    /// Next write index (monotonically increasing, wraps via mask).
    write_idx: AtomicU32,
    consumers: [ConsumerSlot; C],
}

impl<const N: usize, const C: usize> TimingStream<N, C> {
    /// Mask for wrapping index to buffer size.
    const MASK: usize = N - 1;

    /// Create a new empty stream.
    ///
    /// # Panics
    ///
    /// Panics at compile time if N is not a power of 2 ≥ 2 or C is 0.
    pub const fn new() -> Self {
        assert!(N.is_power_of_two() && N >= 2, "Stream size must be power of 2");
        assert!(N <= (1 << 31), "Stream size must fit the 32-bit index space");
        assert!(C > 0, "At least one consumer slot required");

        const EMPTY_SLOT: Slot = Slot::new();
        const FREE_CONSUMER: ConsumerSlot = ConsumerSlot::new();

        Self {
            slots: [EMPTY_SLOT; N],
            write_idx: AtomicU32::new(0),
            consumers: [FREE_CONSUMER; C],
        }
    }

    /// Push an event (producer only).
    ///
    /// # Timing
    ///
    /// O(1), a handful of atomic stores. Never blocks, never allocates,
    /// never fails: the oldest slot is simply overwritten.
    #[inline]
    pub fn push(&self, event: TimingEvent) {
        // Single producer: nobody else moves write_idx.
        let w = self.write_idx.load(Ordering::Relaxed);
        let slot = &self.slots[(w as usize) & Self::MASK];
        let ts = event.timestamp_us as u64;

        slot.stamp.store(w.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        slot.ts_lo.store(ts as u32, Ordering::Relaxed);
        slot.ts_hi.store((ts >> 32) as u32, Ordering::Relaxed);
        slot.word.store(event.kind.to_word(), Ordering::Relaxed);
        slot.stamp.store(w, Ordering::Release);

        self.write_idx.store(w.wrapping_add(1), Ordering::Release);
    }

    /// Read the event at logical index `idx`.
    ///
    /// Returns `None` if it is not yet written, already overwritten, or was
    /// being overwritten while copied.
    pub fn read(&self, idx: u32) -> Option<TimingEvent> {
        let behind = self.write_idx.load(Ordering::Acquire).wrapping_sub(idx);
        if behind == 0 || behind > N as u32 {
            return None;
        }
        self.read_slot(idx)
    }

    fn read_slot(&self, idx: u32) -> Option<TimingEvent> {
        let slot = &self.slots[(idx as usize) & Self::MASK];

        if slot.stamp.load(Ordering::Acquire) != idx {
            return None;
        }
        let lo = slot.ts_lo.load(Ordering::Relaxed);
        let hi = slot.ts_hi.load(Ordering::Relaxed);
        let word = slot.word.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        if slot.stamp.load(Ordering::Relaxed) != idx {
            return None;
        }

        let kind = EventKind::from_word(word)?;
        Some(TimingEvent {
            timestamp_us: ((u64::from(hi) << 32) | u64::from(lo)) as i64,
            kind,
        })
    }

    /// Allocate a cursor positioned at the current write head.
    ///
    /// Safe to call while the producer is pushing. Never allocates: the
    /// cursor table is fixed at `C` entries.
    pub fn register_consumer(&self) -> Result<CursorId, StreamError> {
        for (slot, consumer) in self.consumers.iter().enumerate() {
            if consumer
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            let ticket = consumer.ticket.load(Ordering::Acquire);
            consumer.overrun.set(0);
            consumer.read_idx.store(self.write_head(), Ordering::Release);

            log::debug!("stream: consumer registered in slot {}", slot);
            return Ok(CursorId { slot, ticket });
        }

        log::warn!("stream: consumer refused, all {} slots in use", C);
        Err(StreamError::CapacityExceeded { max: C })
    }

    /// Release a cursor. Safe concurrently with pushes.
    pub fn unregister(&self, cursor: CursorId) -> Result<(), StreamError> {
        let consumer = self.consumer(&cursor).ok_or(StreamError::UnknownCursor)?;
        let lost = consumer.overrun.get();
        // Invalidate outstanding copies of this registration before freeing
        consumer.ticket.fetch_add(1, Ordering::AcqRel);
        consumer.in_use.store(false, Ordering::Release);

        log::debug!(
            "stream: consumer slot {} unregistered ({} events lost)",
            cursor.slot,
            lost
        );
        Ok(())
    }

    fn consumer(&self, cursor: &CursorId) -> Option<&ConsumerSlot> {
        let consumer = self.consumers.get(cursor.slot)?;
        let live = consumer.in_use.load(Ordering::Acquire)
            && consumer.ticket.load(Ordering::Acquire) == cursor.ticket;
        live.then_some(consumer)
    }

    /// Next unread event for this cursor, or `None` when caught up.
    ///
    /// Non-blocking. If the producer lapped the cursor, it jumps to the
    /// oldest retained event and the skipped events are added to its
    /// overrun count.
    pub fn poll(&self, cursor: &mut CursorId) -> Option<TimingEvent> {
        let consumer = self.consumer(cursor)?;
        let mut r = consumer.read_idx.load(Ordering::Relaxed);

        loop {
            let w = self.write_idx.load(Ordering::Acquire);
            let lag = w.wrapping_sub(r);
            if lag == 0 {
                return None;
            }

            if lag > N as u32 {
                consumer.overrun.add(lag - N as u32);
                r = w.wrapping_sub(N as u32);
            }

            let event = self.read_slot(r);
            r = r.wrapping_add(1);
            consumer.read_idx.store(r, Ordering::Release);

            match event {
                Some(event) => return Some(event),
                // Overwritten while we copied it
                None => consumer.overrun.add(1),
            }
        }
    }

    /// Events permanently lost by this cursor.
    ///
    /// Includes events already overwritten but not yet skipped by a poll.
    pub fn overrun_count(&self, cursor: &CursorId) -> u64 {
        self.consumer(cursor).map_or(0, |c| self.lost(c))
    }

    /// Events waiting for this cursor (may exceed `N` before the next poll).
    pub fn lag(&self, cursor: &CursorId) -> u32 {
        self.consumer(cursor).map_or(0, |c| self.pending(c))
    }

    /// Overrun count of a slot, `None` if the slot is free.
    pub fn overrun_by_slot(&self, slot: usize) -> Option<u64> {
        let consumer = self.consumers.get(slot)?;
        if !consumer.in_use.load(Ordering::Acquire) {
            return None;
        }
        Some(self.lost(consumer))
    }

    fn pending(&self, consumer: &ConsumerSlot) -> u32 {
        self.write_head()
            .wrapping_sub(consumer.read_idx.load(Ordering::Acquire))
    }

    fn lost(&self, consumer: &ConsumerSlot) -> u64 {
        let overwritten = self.pending(consumer).saturating_sub(N as u32);
        consumer.overrun.get() + u64::from(overwritten)
    }

    /// Number of registered cursors.
    pub fn consumer_count(&self) -> usize {
        self.consumers
            .iter()
            .filter(|c| c.in_use.load(Ordering::Acquire))
            .count()
    }

    /// Get the current write head index.
    #[inline]
    pub fn write_head(&self) -> u32 {
        self.write_idx.load(Ordering::Acquire)
    }

    /// Get the buffer capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Maximum number of simultaneous cursors.
    #[inline]
    pub const fn max_consumers(&self) -> usize {
        C
    }
}

impl<const N: usize, const C: usize> Default for TimingStream<N, C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GapKind;
    use crate::iambic::Element;

    fn ev(i: i64) -> TimingEvent {
        TimingEvent::key_on(i, Element::Dit)
    }

    #[test]
    fn test_push_poll_basic() {
        let stream = TimingStream::<8, 2>::new();
        let mut cursor = stream.register_consumer().unwrap();

        stream.push(TimingEvent::gap(42, GapKind::Word));
        assert_eq!(stream.poll(&mut cursor), Some(TimingEvent::gap(42, GapKind::Word)));
        assert_eq!(stream.poll(&mut cursor), None);
    }

    #[test]
    fn test_register_then_poll_is_empty() {
        let stream = TimingStream::<8, 2>::new();
        stream.push(ev(1));
        let mut cursor = stream.register_consumer().unwrap();
        assert_eq!(stream.poll(&mut cursor), None);
    }

    #[test]
    fn test_timestamp_keeps_high_bits() {
        let stream = TimingStream::<8, 1>::new();
        let mut cursor = stream.register_consumer().unwrap();
        let ts = 0x1234_5678_9ABC_i64;
        stream.push(ev(ts));
        assert_eq!(stream.poll(&mut cursor).unwrap().timestamp_us, ts);
    }

    #[test]
    fn test_overrun_resyncs_to_oldest() {
        let stream = TimingStream::<16, 1>::new();
        let mut cursor = stream.register_consumer().unwrap();

        for i in 0..(16 + 5) {
            stream.push(ev(i));
        }

        assert_eq!(stream.overrun_count(&cursor), 5);
        assert_eq!(stream.overrun_by_slot(cursor.slot()), Some(5));
        assert_eq!(stream.poll(&mut cursor).unwrap().timestamp_us, 5);
        assert_eq!(stream.overrun_count(&cursor), 5);
        assert_eq!(stream.lag(&cursor), 15);
    }

    #[test]
    fn test_capacity_exceeded() {
        let stream = TimingStream::<8, 2>::new();
        let _a = stream.register_consumer().unwrap();
        let _b = stream.register_consumer().unwrap();
        assert_eq!(
            stream.register_consumer(),
            Err(StreamError::CapacityExceeded { max: 2 })
        );
    }

    #[test]
    fn test_unregister_frees_slot_and_stales_cursor() {
        let stream = TimingStream::<8, 1>::new();
        let a = stream.register_consumer().unwrap();
        let stale = CursorId { slot: a.slot, ticket: a.ticket };
        stream.unregister(a).unwrap();
        assert_eq!(stream.consumer_count(), 0);

        let mut b = stream.register_consumer().unwrap();
        assert_eq!(b.slot(), 0);
        assert_eq!(stream.unregister(stale), Err(StreamError::UnknownCursor));

        stream.push(ev(1));
        assert!(stream.poll(&mut b).is_some());
    }

    #[test]
    fn test_read_window() {
        let stream = TimingStream::<4, 1>::new();
        for i in 0..6 {
            stream.push(ev(i));
        }
        assert!(stream.read(0).is_none());
        assert!(stream.read(1).is_none());
        assert_eq!(stream.read(2).unwrap().timestamp_us, 2);
        assert_eq!(stream.read(5).unwrap().timestamp_us, 5);
        assert!(stream.read(6).is_none());
    }

    #[test]
    fn test_split_counter_carry() {
        let counter = SplitU64::new();
        counter.set(u64::from(u32::MAX) - 1);
        counter.add(3);
        assert_eq!(counter.get(), u64::from(u32::MAX) + 2);
    }
}
