use crate::fleet::worker::BlockRange;

/// Hands out half-open block ranges to range readers, keeping at most
/// `max_readers` in flight.
///
/// `last_assigned_block` advances by the full `batch_size` stride even when
/// the final range is clamped to `head`; the dispatch guard keeps the
/// overshoot harmless.
#[derive(Debug)]
pub struct ReaderDispatcher {
    batch_size: u64,
    max_readers: usize,
    head: u64,
    active_readers: usize,
    last_assigned_block: u64,
    allow_more_readers: bool,
}

impl ReaderDispatcher {
    pub fn new(starting_block: u64, head: u64, batch_size: u64, max_readers: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_readers,
            head,
            active_readers: 0,
            last_assigned_block: starting_block,
            allow_more_readers: true,
        }
    }

    /// Assigns the next range if the dispatch guard allows one:
    /// `active < max_readers`, `last_assigned < head`, and assignments are
    /// still allowed.
    pub fn next_range(&mut self) -> Option<BlockRange> {
        if !self.allow_more_readers
            || self.active_readers >= self.max_readers
            || self.last_assigned_block >= self.head
        {
            return None;
        }

        let first = self.last_assigned_block;
        let last = first.saturating_add(self.batch_size).min(self.head);
        self.last_assigned_block = first.saturating_add(self.batch_size);
        self.active_readers += 1;
        Some(BlockRange::new(first, last))
    }

    /// Handles a reader-completion: exactly one dispatch per completion, or
    /// none when the guard fails (the reader is left idle).
    pub fn on_reader_completed(&mut self) -> Option<BlockRange> {
        self.active_readers = self.active_readers.saturating_sub(1);
        self.next_range()
    }

    /// Stops all further assignments; used by the stop handler.
    pub fn halt(&mut self) {
        self.allow_more_readers = false;
    }

    pub fn active_readers(&self) -> usize {
        self.active_readers
    }

    pub fn last_assigned_block(&self) -> u64 {
        self.last_assigned_block
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn max_readers(&self) -> usize {
        self.max_readers
    }

    /// True once every block below `head` has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.last_assigned_block >= self.head
    }
}
