/// One sample of a cumulative or instantaneous metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTimestamp {
    pub value: u64,
    pub sampled_at_nanos: u64,
}

/// Fixed-capacity ring of samples for a single (pid, resource) pair
///
/// Once full, each new sample overwrites the oldest slot.
#[derive(Debug, Clone)]
pub struct ResourceHolder {
    slots: Vec<DataTimestamp>,
    capacity: usize,
    /// Index of the slot the next sample will be written to
    head: usize,
}

impl ResourceHolder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn push(&mut self, sample: DataTimestamp) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.head] = sample;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<DataTimestamp> {
        self.nth_newest(0)
    }

    /// Sample taken just before the most recent one
    pub fn previous(&self) -> Option<DataTimestamp> {
        self.nth_newest(1)
    }

    fn nth_newest(&self, n: usize) -> Option<DataTimestamp> {
        if n >= self.slots.len() {
            return None;
        }
        let index = (self.head + self.capacity - 1 - n) % self.capacity;
        self.slots.get(index).copied()
    }

    /// Samples from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = DataTimestamp> + '_ {
        (0..self.slots.len())
            .rev()
            .filter_map(move |n| self.nth_newest(n))
    }

    /// Enlarge the ring, keeping the existing samples in order
    pub fn grow(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let ordered: Vec<DataTimestamp> = self.iter().collect();
        self.head = ordered.len() % capacity;
        self.slots = ordered;
        self.slots.reserve(capacity - self.slots.len());
        self.capacity = capacity;
    }
}
