use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One-slot handoff between a socket loop and the tick owner.
///
/// Each direction has exactly one writer and one reader. The writer only
/// fills an empty slot and the reader only empties a full one, so a batch is
/// never lost or delivered twice.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Places `batch` in the slot if it is empty, otherwise hands it back.
    pub fn offer(&self, batch: Vec<u8>) -> Result<(), Vec<u8>> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(batch);
        }
        *slot = Some(batch);
        Ok(())
    }

    /// Empties the slot.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.lock().take()
    }

    /// Copies the staged batch without clearing it. The send loop clears only
    /// after the whole batch reached the peer.
    pub fn peek(&self) -> Option<Vec<u8>> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_slot_rejects_second_batch() {
        let mailbox = Mailbox::new();
        assert!(mailbox.offer(vec![1]).is_ok());
        assert_eq!(mailbox.offer(vec![2]), Err(vec![2]));
        assert_eq!(mailbox.take(), Some(vec![1]));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn peek_leaves_batch_staged() {
        let mailbox = Mailbox::new();
        mailbox.offer(vec![9, 9]).unwrap();
        assert_eq!(mailbox.peek(), Some(vec![9, 9]));
        assert!(!mailbox.is_empty());
        mailbox.clear();
        assert!(mailbox.is_empty());
    }
}
