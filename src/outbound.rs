use crate::codec::PacketCodec;
use crate::protocol::EventId;
use crate::registry::StationHash;
use bytes::BufMut;
use heapless::Deque;
use tracing::{trace, warn};

/// Hard upper bound on frames waiting for the next flush.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

type FrameQueue = Deque<Vec<u8>, OUTBOUND_QUEUE_CAPACITY>;

/// Ordered buffer of encoded host-to-peer frames, coalesced once per tick.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: FrameQueue,
    limit: usize,
    rejected: u32,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::with_limit(OUTBOUND_QUEUE_CAPACITY)
    }

    /// Caps the queue below the compile-time capacity.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            frames: Deque::new(),
            limit: limit.clamp(1, OUTBOUND_QUEUE_CAPACITY),
            rejected: 0,
        }
    }

    /// Frames and queues one command. Station-scoped commands get the
    /// big-endian station hash ahead of the payload. Queued frames are never
    /// evicted: when the queue is full the new frame is refused.
    pub fn enqueue(
        &mut self,
        event: EventId,
        payload: &[u8],
        station: Option<StationHash>,
    ) -> bool {
        if self.frames.len() >= self.limit {
            self.rejected = self.rejected.saturating_add(1);
            warn!(?event, rejected = self.rejected, "Outbound queue full, command refused");
            return false;
        }

        let mut body = Vec::with_capacity(payload.len() + 4);
        if let Some(hash) = station {
            body.put_u32(hash.get());
        }
        body.put_slice(payload);

        let frame = match PacketCodec::encode_outbound(event.as_byte(), &body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(?event, error = %e, "Refusing to queue outbound frame");
                return false;
            }
        };

        if let Err(frame) = self.frames.push_back(frame) {
            // Only reachable if limit exceeds the backing capacity.
            warn!(?event, len = frame.len(), "Outbound frame discarded");
            return false;
        }

        trace!(?event, queued = self.frames.len(), "Queued outbound frame");
        true
    }

    /// Removes every queued frame and concatenates them in enqueue order.
    pub fn drain_concatenated(&mut self) -> Option<Vec<u8>> {
        if self.frames.is_empty() {
            return None;
        }

        let total: usize = self.frames.iter().map(Vec::len).sum();
        let mut batch = Vec::with_capacity(total);
        while let Some(frame) = self.frames.pop_front() {
            batch.extend_from_slice(&frame);
        }
        Some(batch)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True when a frame for `event` is waiting for the next flush.
    pub fn has_pending(&self, event: EventId) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.get(2) == Some(&event.as_byte()))
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_hash_precedes_payload() {
        let mut queue = OutboundQueue::new();
        let hash = StationHash::new(0x0102_0304);
        assert!(queue.enqueue(EventId::DraxOutputBitEnable, &[0x00, 0x20], hash));

        let batch = queue.drain_concatenated().unwrap();
        assert_eq!(batch, vec![0x00, 0x07, 0x13, 0x01, 0x02, 0x03, 0x04, 0x00, 0x20]);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_refuses_new_frames() {
        let mut queue = OutboundQueue::with_limit(2);
        assert!(queue.enqueue(EventId::PrintTest, &[1], None));
        assert!(queue.enqueue(EventId::HostAlive, &[2], None));
        assert!(!queue.enqueue(EventId::HostAlive, &[3], None));

        assert_eq!(queue.rejected(), 1);
        let batch = queue.drain_concatenated().unwrap();
        assert_eq!(batch, vec![0x00, 0x02, 0x44, 1, 0x00, 0x02, 0x00, 2]);
        assert!(queue.enqueue(EventId::HostAlive, &[], None));
    }

    #[test]
    fn pending_lookup_matches_event_byte() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(EventId::RetrieveConnectedDevices, &[], None);
        assert!(queue.has_pending(EventId::RetrieveConnectedDevices));
        assert!(!queue.has_pending(EventId::HostAlive));
    }
}
