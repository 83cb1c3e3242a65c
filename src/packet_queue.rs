use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::Mutex;

/// The framed records of one connection awaiting consumption, in datagram arrival order.
///
/// Records are appended only by the connection's receive task and drained only by `read`
///  calls. A read for fewer bytes than the head record holds returns a prefix of the framed
///  bytes and leaves the suffix in place as the new head, so a record is always consumed
///  completely before any later arrival becomes visible.
pub struct PacketQueue {
    records: Mutex<VecDeque<Bytes>>,
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketQueue {
    pub fn new() -> PacketQueue {
        PacketQueue {
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, record: Bytes) {
        self.records.lock().await
            .push_back(record);
    }

    /// Returns up to `max_bytes` from the head record, or an empty buffer if nothing is
    ///  queued. Splitting a `Bytes` handle keeps the remainder as a view into the same
    ///  allocation, so partial reads do not copy the retained suffix.
    pub async fn read(&self, max_bytes: usize) -> Bytes {
        let mut records = self.records.lock().await;

        match records.pop_front() {
            None => Bytes::new(),
            Some(mut head) if max_bytes < head.len() => {
                let consumed = head.split_to(max_bytes);
                records.push_front(head);
                consumed
            }
            Some(head) => head,
        }
    }

    /// number of (possibly partially consumed) records currently queued
    pub async fn num_records(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}
