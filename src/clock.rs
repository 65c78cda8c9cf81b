//! Player tick counter

use std::time::Instant;

/// Millisecond ticks ("jiffies") since the clock was created.
///
/// The counter wraps at `u32::MAX` like the field it is reported in.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn jiffies(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jiffies_advance() {
        let clock = Clock::new();
        let first = clock.jiffies();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.jiffies() >= first + 5);
    }
}
