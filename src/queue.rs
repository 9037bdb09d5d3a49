//! Fixed-capacity ring buffer and its auto-doubling FIFO wrapper

/// Circular buffer of `capacity` slots holding at most `capacity - 1` values.
///
/// One slot stays empty as a sentinel so full and empty are distinguishable
/// without a separate counter.
#[derive(Debug)]
pub struct RingQueue<T> {
    buf: Vec<Option<T>>,
    read_pos: usize,
    write_pos: usize,
}

impl<T> RingQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring needs at least one usable slot");
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Store a value; hands it back when the ring is full.
    pub fn write(&mut self, value: T) -> Result<(), T> {
        let next = (self.write_pos + 1) % self.buf.len();
        if next == self.read_pos {
            return Err(value);
        }
        self.write_pos = next;
        self.buf[next] = Some(value);
        Ok(())
    }

    /// Take the oldest value, or `None` when empty.
    pub fn read(&mut self) -> Option<T> {
        if self.read_pos == self.write_pos {
            return None;
        }
        self.read_pos = (self.read_pos + 1) % self.buf.len();
        self.buf[self.read_pos].take()
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub fn len(&self) -> usize {
        let cap = self.buf.len();
        (self.write_pos + cap - self.read_pos) % cap
    }

    /// Total slots, one of which is the sentinel.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

const DEFAULT_RING_CAPACITY: usize = 16;

/// FIFO queue over [`RingQueue`] that doubles capacity when full.
///
/// Amortized O(1) push/shift; a resize drains the old ring in order into a
/// ring of twice the size.
#[derive(Debug)]
pub struct Queue<T> {
    ring: RingQueue<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingQueue::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: T) {
        if let Err(value) = self.ring.write(value) {
            let mut grown = RingQueue::with_capacity(self.ring.capacity() * 2);
            while let Some(v) = self.ring.read() {
                // cannot fail: the new ring is strictly larger
                let _ = grown.write(v);
            }
            let _ = grown.write(value);
            self.ring = grown;
        }
    }

    pub fn shift(&mut self) -> Option<T> {
        self.ring.read()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
