//! Counter unwrapping.

/// Turns a vendor loop counter that may reset or wrap into a monotonic one.
///
/// Any decrease is treated as a wrap: numbering continues one past the last
/// unwrapped value and then follows the raw counter's increments.
///
/// ```
/// use twix2mrd::normalize::WrapCounter;
///
/// let mut counter = WrapCounter::new();
/// let unwrapped: Vec<u32> = [0, 1, 2, 0, 1, 0].iter().map(|&raw| counter.advance(raw)).collect();
/// assert_eq!(unwrapped, vec![0, 1, 2, 3, 4, 5]);
/// assert_eq!(counter.wraps(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapCounter {
    last_raw: Option<u32>,
    last: u32,
    offset: u32,
    wraps: u32,
}

impl WrapCounter {
    /// Counter that has seen nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw value, returning its unwrapped value
    pub fn advance(&mut self, raw: u16) -> u32 {
        let raw = u32::from(raw);
        if let Some(previous) = self.last_raw {
            if raw < previous {
                self.offset = self.last + 1 - raw;
                self.wraps += 1;
            }
        }
        self.last_raw = Some(raw);
        self.last = raw + self.offset;
        self.last
    }

    /// Number of decreases seen
    pub fn wraps(&self) -> u32 {
        self.wraps
    }

    /// Last unwrapped value
    pub fn current(&self) -> Option<u32> {
        self.last_raw.map(|_| self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_input_is_unchanged() {
        let mut counter = WrapCounter::new();
        assert_eq!(counter.current(), None);
        for raw in [0u16, 0, 1, 5, 5, 9] {
            assert_eq!(counter.advance(raw), u32::from(raw));
        }
        assert_eq!(counter.wraps(), 0);
        assert_eq!(counter.current(), Some(9));
    }

    #[test]
    fn test_reset_continues_after_last_value() {
        let mut counter = WrapCounter::new();
        let values: Vec<u32> = [3u16, 4, 1, 2, 2, 0].iter().map(|&r| counter.advance(r)).collect();
        assert_eq!(values, vec![3, 4, 5, 6, 6, 7]);
        assert_eq!(counter.wraps(), 2);
    }

    #[test]
    fn test_wrap_past_u16_range() {
        let mut counter = WrapCounter::new();
        counter.advance(u16::MAX);
        assert_eq!(counter.advance(0), u32::from(u16::MAX) + 1);
    }
}
