//! Human-readable byte counts for log fields.

use std::fmt;

const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

/// Displays a byte count in the largest IEC unit that keeps the value at or above one, with at
/// most two decimals and trailing zeros removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub usize);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0 as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit + 1 < UNITS.len() {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            return write!(f, "{} B", self.0);
        }

        let rendered = format!("{value:.2}");
        let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
        write!(f, "{trimmed} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::ByteSize;

    #[test]
    fn picks_largest_whole_unit() {
        assert_eq!(ByteSize(0).to_string(), "0 B");
        assert_eq!(ByteSize(1023).to_string(), "1023 B");
        assert_eq!(ByteSize(1024).to_string(), "1 KiB");
        assert_eq!(ByteSize(1536).to_string(), "1.5 KiB");
        assert_eq!(ByteSize(50 * 1024 * 1024).to_string(), "50 MiB");
        assert_eq!(ByteSize(100 * 1024 * 1024 + 300 * 1024).to_string(), "100.29 MiB");
    }

    #[test]
    fn caps_at_gibibytes() {
        assert_eq!(ByteSize(3 * 1024 * 1024 * 1024 * 1024).to_string(), "3072 GiB");
    }
}
