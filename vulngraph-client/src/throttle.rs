/// Emits a log line every `every` events instead of on each one.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    every: usize,
    seen: usize,
}

impl LogThrottle {
    pub fn new(every: usize) -> Self {
        Self { every, seen: 0 }
    }

    /// Count an event; true when this one should be logged.
    pub fn tick(&mut self) -> bool {
        self.seen += 1;
        self.every > 0 && self.seen % self.every == 0
    }

    pub fn seen(&self) -> usize {
        self.seen
    }
}
