//! Stream consumers.
//!
//! Decoder, sidetone driver, UI broadcaster and diagnostics each hold one
//! [`StreamConsumer`]: a cursor into the [`TimingStream`] that drains at its
//! own pace.
//!
//! # Contract
//!
//! "I process when I can. If I fall behind, I lose the oldest events and
//! the loss is counted."
//!
//! Never blocks the producer, never FAULTs.

use crate::event::TimingEvent;
use crate::stream::{CursorId, StreamError, TimingStream, DEFAULT_MAX_CONSUMERS, DEFAULT_STREAM_SIZE};

/// RAII consumer: registers on creation, unregisters on drop.
///
/// # Example
///
/// ```
/// use cw_keyer_core::consumer::StreamConsumer;
/// use cw_keyer_core::event::TimingEvent;
/// use cw_keyer_core::iambic::Element;
/// use cw_keyer_core::stream::TimingStream;
///
/// static STREAM: TimingStream<64, 2> = TimingStream::new();
///
/// let mut decoder = StreamConsumer::new(&STREAM).unwrap();
/// STREAM.push(TimingEvent::key_on(0, Element::Dit));
///
/// for event in decoder.drain() {
///     assert!(event.kind.is_keying());
/// }
/// ```
pub struct StreamConsumer<'a, const N: usize = DEFAULT_STREAM_SIZE, const C: usize = DEFAULT_MAX_CONSUMERS> {
    stream: &'a TimingStream<N, C>,
    /// Always `Some` until drop.
    cursor: Option<CursorId>,
}

impl<'a, const N: usize, const C: usize> StreamConsumer<'a, N, C> {
    /// Register a new consumer at the current write head.
    ///
    /// Fails with [`StreamError::CapacityExceeded`] when every slot is taken.
    pub fn new(stream: &'a TimingStream<N, C>) -> Result<Self, StreamError> {
        let cursor = stream.register_consumer()?;
        Ok(Self {
            stream,
            cursor: Some(cursor),
        })
    }

    /// Next event, or `None` when caught up with the producer.
    #[inline]
    pub fn poll(&mut self) -> Option<TimingEvent> {
        let cursor = self.cursor.as_mut()?;
        self.stream.poll(cursor)
    }

    /// Drain all available events.
    ///
    /// Yields until the consumer catches up with the producer.
    #[inline]
    pub fn drain(&mut self) -> DrainIterator<'_, 'a, N, C> {
        DrainIterator { consumer: self }
    }

    /// Events permanently lost by this consumer.
    #[inline]
    pub fn overrun_count(&self) -> u64 {
        self.cursor
            .as_ref()
            .map_or(0, |cursor| self.stream.overrun_count(cursor))
    }

    /// Events waiting to be read.
    #[inline]
    pub fn lag(&self) -> u32 {
        self.cursor.as_ref().map_or(0, |cursor| self.stream.lag(cursor))
    }

    /// Consumer slot index (for diagnostics).
    pub fn slot(&self) -> Option<usize> {
        self.cursor.as_ref().map(CursorId::slot)
    }
}

impl<const N: usize, const C: usize> Drop for StreamConsumer<'_, N, C> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            // Only fails for a stale cursor, which an owned handle never is
            let _ = self.stream.unregister(cursor);
        }
    }
}

/// Iterator for draining all available events.
pub struct DrainIterator<'c, 'a, const N: usize, const C: usize> {
    consumer: &'c mut StreamConsumer<'a, N, C>,
}

impl<const N: usize, const C: usize> Iterator for DrainIterator<'_, '_, N, C> {
    type Item = TimingEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.consumer.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iambic::Element;

    #[test]
    fn test_drain() {
        let stream = TimingStream::<64, 2>::new();
        let mut consumer = StreamConsumer::new(&stream).unwrap();

        for i in 0..5 {
            stream.push(TimingEvent::key_on(i, Element::Dah));
        }

        assert_eq!(consumer.lag(), 5);
        assert_eq!(consumer.drain().count(), 5);
        assert_eq!(consumer.drain().count(), 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let stream = TimingStream::<64, 1>::new();
        {
            let consumer = StreamConsumer::new(&stream).unwrap();
            assert_eq!(consumer.slot(), Some(0));
            assert!(StreamConsumer::new(&stream).is_err());
        }
        assert_eq!(stream.consumer_count(), 0);
        assert!(StreamConsumer::new(&stream).is_ok());
    }

    #[test]
    fn test_slow_consumer_counts_loss() {
        let stream = TimingStream::<8, 2>::new();
        let mut slow = StreamConsumer::new(&stream).unwrap();

        for i in 0..20 {
            stream.push(TimingEvent::key_off(i, Element::Dit));
        }

        let seen: Vec<i64> = slow.drain().map(|e| e.timestamp_us).collect();
        assert_eq!(seen, (12..20).collect::<Vec<_>>());
        assert_eq!(slow.overrun_count(), 12);
    }
}
