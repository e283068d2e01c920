//! Fixed-capacity FIFO history for rolling performance records.
//!
//! Keeps the most recent `capacity` items; pushing into a full history
//! evicts (and returns) the oldest. Iteration yields oldest to newest.
//!
//! Used for the frame-rate sample history and the long-task log.

/// A bounded, oldest-first rolling history.
pub struct History<T> {
    buf: Vec<Option<T>>,
    capacity: usize,
    head: usize, // next write position
    len: usize,
    total: u64, // total items ever pushed
}

impl<T> History<T> {
    /// Create a history holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            capacity,
            head: 0,
            len: 0,
            total: 0,
        }
    }

    /// Append an item, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.buf[self.head].replace(item);
        self.head = (self.head + 1) % self.capacity;
        self.total += 1;
        if self.len < self.capacity {
            self.len += 1;
            None
        } else {
            evicted
        }
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> HistoryIter<'_, T> {
        let start = if self.len < self.capacity {
            0
        } else {
            self.head
        };
        HistoryIter {
            buf: &self.buf,
            capacity: self.capacity,
            pos: start,
            remaining: self.len,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Items evicted since creation.
    #[must_use]
    pub fn total_evicted(&self) -> u64 {
        self.total.saturating_sub(self.capacity as u64)
    }
}

impl<T: Clone> History<T> {
    /// Owned copy, oldest to newest.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl History<u32> {
    /// Arithmetic mean of the retained samples, `None` when empty.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let sum: u64 = self.iter().map(|&v| u64::from(v)).sum();
        Some(sum as f64 / self.len as f64)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for History<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("total_pushed", &self.total)
            .finish()
    }
}

/// Iterator over history items (oldest to newest).
pub struct HistoryIter<'a, T> {
    buf: &'a [Option<T>],
    capacity: usize,
    pos: usize,
    remaining: usize,
}

impl<'a, T> Iterator for HistoryIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.buf[self.pos].as_ref();
        self.pos = (self.pos + 1) % self.capacity;
        self.remaining -= 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for HistoryIter<'_, T> {}
