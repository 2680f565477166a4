use serde::Serialize;

/// Scalar logical clock. Local writes tick it; a received snapshot is
/// installed only when it carries a strictly greater value, which is then
/// adopted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogicalClock {
    value: u64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn tick(&mut self) -> u64 {
        self.value += 1;
        self.value
    }

    pub fn accepts(&self, carried: u64) -> bool {
        carried > self.value
    }

    pub fn adopt(&mut self, carried: u64) {
        self.value = self.value.max(carried);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_monotonic() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.value(), 2);
    }

    #[test]
    fn only_strictly_greater_values_are_accepted() {
        let mut clock = LogicalClock::new();
        clock.adopt(5);
        assert!(!clock.accepts(4));
        assert!(!clock.accepts(5));
        assert!(clock.accepts(6));
    }

    #[test]
    fn adopt_never_moves_backwards() {
        let mut clock = LogicalClock::new();
        clock.adopt(7);
        clock.adopt(3);
        assert_eq!(clock.value(), 7);
    }
}
