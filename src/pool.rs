//! Fixed-capacity record pool shared by one producer and one consumer.
//!
//! Slots are built once by a factory and reused forever. The pool hands out
//! references to them, never copies.
//!
//! Addressing rule: a cursor is advanced first and the slot it now points to is the
//! one being used.
//! - The writer fills the slot after the write cursor; `WriteSlot::commit` moves the
//!   write cursor onto it, which is what makes it readable.
//! - A read moves the read cursor forward and returns the slot it lands on. That
//!   slot stays out of the writer's reach until the following read.
//!
//! `empty <=> read == write`, `full <=> (write + 1) % N == read`, so at most `N - 1`
//! records are ever pending.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{PipelineError, PoolEmpty, PoolFull};
use crate::shutdown::StopToken;

struct Cursors {
    write: usize,
    read: usize,
    writer_closed: bool,
    reader_closed: bool,
}

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    cursors: Mutex<Cursors>,
    changed: Condvar,
}

// SAFETY: slot contents are reachable only through `WriteSlot` and `ReadSlot`.
// Each handle is unique and lends out at most one slot at a time (`&mut self`
// borrow), and the cursor checks below keep the writer's pending slot and the
// reader's current slot on different indices.
unsafe impl<T: Send> Sync for Shared<T> {}

enum WaitState {
    Ready,
    Pending,
    Abandoned,
}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn lock(&self) -> MutexGuard<'_, Cursors> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, cursors: &Cursors) -> bool {
        self.advance(cursors.write) == cursors.read
    }

    fn pending(&self, cursors: &Cursors) -> usize {
        (cursors.write + self.capacity() - cursors.read) % self.capacity()
    }

    /// Block on the condvar until `state` says ready or abandoned, re-checking the
    /// stop token at least every `poll`.
    fn wait_for(
        &self,
        stop: &StopToken,
        poll: Duration,
        state: impl Fn(&Cursors) -> WaitState,
    ) -> bool {
        let mut cursors = self.lock();
        loop {
            match state(&cursors) {
                WaitState::Ready => return true,
                WaitState::Abandoned => return false,
                WaitState::Pending => {}
            }
            if stop.is_stopped() {
                return false;
            }
            cursors = self
                .changed
                .wait_timeout(cursors, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn slot_mut(&self, index: usize) -> &mut T {
        &mut *self.slots[index].get()
    }
}

/// A pool before it is split into its producer and consumer handles.
pub struct RecordPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> RecordPool<T> {
    /// Build `capacity` slots with `factory`. Capacity must be at least 2 since
    /// one slot is always reserved.
    pub fn new(capacity: usize, mut factory: impl FnMut() -> T) -> Result<Self, PipelineError> {
        if capacity < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "record pool capacity must be >= 2 (got {capacity})"
            )));
        }
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(factory()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            shared: Arc::new(Shared {
                slots,
                cursors: Mutex::new(Cursors {
                    write: 0,
                    read: 0,
                    writer_closed: false,
                    reader_closed: false,
                }),
                changed: Condvar::new(),
            }),
        })
    }

    pub fn split(self) -> (PoolWriter<T>, PoolReader<T>) {
        (
            PoolWriter {
                shared: self.shared.clone(),
            },
            PoolReader {
                shared: self.shared,
            },
        )
    }
}

/// Producer handle. There is exactly one per pool.
pub struct PoolWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PoolWriter<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Records committed and not yet read.
    pub fn pending(&self) -> usize {
        let cursors = self.shared.lock();
        self.shared.pending(&cursors)
    }

    /// Reserve the next free slot. Never blocks.
    ///
    /// The slot is invisible to the reader until `commit`. Dropping it uncommitted
    /// leaves the pool unchanged and the same slot is handed out next time.
    pub fn acquire_write_slot(&mut self) -> Result<WriteSlot<'_, T>, PoolFull> {
        let cursors = self.shared.lock();
        if self.shared.is_full(&cursors) {
            return Err(PoolFull);
        }
        let index = self.shared.advance(cursors.write);
        drop(cursors);
        Ok(WriteSlot {
            shared: &self.shared,
            index,
        })
    }

    /// Wait until a slot frees up, then reserve it.
    ///
    /// Returns `None` if `stop` fires or the reader has gone away.
    pub fn wait_write_slot(
        &mut self,
        stop: &StopToken,
        poll: Duration,
    ) -> Option<WriteSlot<'_, T>> {
        let shared = &self.shared;
        let ready = shared.wait_for(stop, poll, |cursors| {
            if cursors.reader_closed {
                WaitState::Abandoned
            } else if shared.is_full(cursors) {
                WaitState::Pending
            } else {
                WaitState::Ready
            }
        });
        if !ready {
            return None;
        }
        // Only the single writer can fill the pool, so the space found above is still there.
        self.acquire_write_slot().ok()
    }
}

impl<T> Drop for PoolWriter<T> {
    fn drop(&mut self) {
        self.shared.lock().writer_closed = true;
        self.shared.changed.notify_all();
    }
}

/// Consumer handle. There is exactly one per pool; fan out after reading.
pub struct PoolReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PoolReader<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn pending(&self) -> usize {
        let cursors = self.shared.lock();
        self.shared.pending(&cursors)
    }

    /// Take the oldest committed record. Never blocks.
    pub fn acquire_read_slot(&mut self) -> Result<ReadSlot<'_, T>, PoolEmpty> {
        let mut cursors = self.shared.lock();
        if cursors.read == cursors.write {
            return Err(PoolEmpty);
        }
        cursors.read = self.shared.advance(cursors.read);
        let index = cursors.read;
        drop(cursors);
        self.shared.changed.notify_all();
        Ok(ReadSlot {
            shared: &self.shared,
            index,
        })
    }

    /// Wait for a committed record.
    ///
    /// Returns `None` if `stop` fires, or once the writer is gone and everything it
    /// committed has been read.
    pub fn wait_read_slot(&mut self, stop: &StopToken, poll: Duration) -> Option<ReadSlot<'_, T>> {
        let ready = self.shared.wait_for(stop, poll, |cursors| {
            if cursors.read != cursors.write {
                WaitState::Ready
            } else if cursors.writer_closed {
                WaitState::Abandoned
            } else {
                WaitState::Pending
            }
        });
        if !ready {
            return None;
        }
        self.acquire_read_slot().ok()
    }
}

impl<T> Drop for PoolReader<T> {
    fn drop(&mut self) {
        self.shared.lock().reader_closed = true;
        self.shared.changed.notify_all();
    }
}

/// Exclusive access to a reserved slot. Contents are left over from the slot's
/// previous use; overwrite what you need.
pub struct WriteSlot<'a, T> {
    shared: &'a Shared<T>,
    index: usize,
}

impl<T> WriteSlot<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Publish the record to the reader.
    pub fn commit(self) {
        self.shared.lock().write = self.index;
        self.shared.changed.notify_all();
    }
}

impl<T> Deref for WriteSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see `Shared`; this slot is reserved for the writer.
        unsafe { self.shared.slot_mut(self.index) }
    }
}

impl<T> DerefMut for WriteSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Shared`; this slot is reserved for the writer.
        unsafe { self.shared.slot_mut(self.index) }
    }
}

/// The record just read. The reader may also mutate it (e.g. to take the frame
/// out for the display path); the writer cannot reach it until the next read.
pub struct ReadSlot<'a, T> {
    shared: &'a Shared<T>,
    index: usize,
}

impl<T> ReadSlot<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for ReadSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see `Shared`; the read cursor sits on this slot.
        unsafe { self.shared.slot_mut(self.index) }
    }
}

impl<T> DerefMut for ReadSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Shared`; the read cursor sits on this slot.
        unsafe { self.shared.slot_mut(self.index) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    fn pool(capacity: usize) -> (PoolWriter<char>, PoolReader<char>) {
        RecordPool::new(capacity, || ' ').unwrap().split()
    }

    fn write(writer: &mut PoolWriter<char>, value: char) -> Result<(), PoolFull> {
        let mut slot = writer.acquire_write_slot()?;
        *slot = value;
        slot.commit();
        Ok(())
    }

    #[test]
    fn capacity_four_holds_three() {
        let (mut writer, mut reader) = pool(4);
        write(&mut writer, 'A').unwrap();
        write(&mut writer, 'B').unwrap();
        write(&mut writer, 'C').unwrap();
        assert_eq!(write(&mut writer, 'D'), Err(PoolFull));

        assert_eq!(*reader.acquire_read_slot().unwrap(), 'A');
        assert_eq!(*reader.acquire_read_slot().unwrap(), 'B');
        assert_eq!(*reader.acquire_read_slot().unwrap(), 'C');
        assert!(matches!(reader.acquire_read_slot(), Err(PoolEmpty)));
    }

    #[test]
    fn empty_pool_returns_empty_sentinel() {
        let (_writer, mut reader) = pool(3);
        assert!(matches!(reader.acquire_read_slot(), Err(PoolEmpty)));
    }

    #[test]
    fn uncommitted_slot_is_never_read() {
        let (mut writer, mut reader) = pool(4);
        {
            let mut slot = writer.acquire_write_slot().unwrap();
            *slot = 'X';
        }
        assert!(matches!(reader.acquire_read_slot(), Err(PoolEmpty)));
        assert_eq!(writer.pending(), 0);

        // The abandoned slot is reused by the next reservation.
        let first = writer.acquire_write_slot().unwrap().index();
        let second = writer.acquire_write_slot().unwrap().index();
        assert_eq!(first, second);
    }

    #[test]
    fn full_after_n_minus_one_outstanding() {
        for capacity in 2..8 {
            let (mut writer, _reader) = pool(capacity);
            for i in 0..capacity - 1 {
                write(&mut writer, char::from(b'a' + i as u8)).unwrap();
            }
            assert_eq!(writer.pending(), capacity - 1);
            assert_eq!(write(&mut writer, 'z'), Err(PoolFull));
        }
    }

    #[test]
    fn order_is_preserved_across_wraparound() {
        let (mut writer, mut reader) = pool(4);
        let mut expected = Vec::new();
        let mut seen = Vec::new();
        for round in 0..10u8 {
            for i in 0..2u8 {
                let value = char::from(b'a' + (round * 2 + i) % 26);
                write(&mut writer, value).unwrap();
                expected.push(value);
            }
            while let Ok(slot) = reader.acquire_read_slot() {
                seen.push(*slot);
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn read_slot_is_protected_until_next_read() {
        let (mut writer, mut reader) = pool(3);
        write(&mut writer, 'A').unwrap();
        write(&mut writer, 'B').unwrap();

        let held = reader.acquire_read_slot().unwrap().index();
        // One free slot opened up; fill it.
        write(&mut writer, 'C').unwrap();
        assert_eq!(write(&mut writer, 'D'), Err(PoolFull));

        // Reading B releases A's slot, which is the next one the writer gets.
        assert_eq!(*reader.acquire_read_slot().unwrap(), 'B');
        assert_eq!(writer.acquire_write_slot().unwrap().index(), held);
    }

    #[test]
    fn rejects_capacity_below_two() {
        assert!(RecordPool::new(1, || 0u8).is_err());
        assert!(RecordPool::new(0, || 0u8).is_err());
    }

    #[test]
    fn wait_read_returns_none_on_stop() {
        let (_writer, mut reader) = pool(4);
        let stop = StopToken::new();
        let stopper = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop();
        });
        let started = Instant::now();
        assert!(reader.wait_read_slot(&stop, POLL).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
        handle.join().unwrap();
    }

    #[test]
    fn wait_read_drains_then_ends_when_writer_drops() {
        let (mut writer, mut reader) = pool(4);
        write(&mut writer, 'A').unwrap();
        drop(writer);
        let stop = StopToken::new();
        assert_eq!(*reader.wait_read_slot(&stop, POLL).unwrap(), 'A');
        assert!(reader.wait_read_slot(&stop, POLL).is_none());
    }

    #[test]
    fn wait_write_unblocks_after_read() {
        let (mut writer, mut reader) = pool(2);
        write(&mut writer, 'A').unwrap();
        let stop = StopToken::new();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let value = *reader.acquire_read_slot().unwrap();
            (value, reader)
        });
        let mut slot = writer.wait_write_slot(&stop, POLL).expect("slot frees up");
        *slot = 'B';
        slot.commit();
        let (first, mut reader) = handle.join().unwrap();
        assert_eq!(first, 'A');
        assert_eq!(*reader.acquire_read_slot().unwrap(), 'B');
    }

    #[test]
    fn wait_write_gives_up_when_reader_drops() {
        let (mut writer, reader) = pool(2);
        write(&mut writer, 'A').unwrap();
        drop(reader);
        let stop = StopToken::new();
        assert!(writer.wait_write_slot(&stop, POLL).is_none());
    }

    #[test]
    fn concurrent_handoff_preserves_order() {
        let (mut writer, mut reader) = RecordPool::new(4, || 0u32).unwrap().split();
        let stop = StopToken::new();
        let producer_stop = stop.clone();
        let producer = thread::spawn(move || {
            for value in 1..=500u32 {
                let mut slot = writer
                    .wait_write_slot(&producer_stop, POLL)
                    .expect("reader keeps up");
                *slot = value;
                slot.commit();
            }
        });
        let mut received = Vec::with_capacity(500);
        while let Some(slot) = reader.wait_read_slot(&stop, POLL) {
            received.push(*slot);
        }
        producer.join().unwrap();
        assert_eq!(received, (1..=500).collect::<Vec<_>>());
    }
}
