use std::fmt;

/// A byte count, displayed with a binary unit suffix (`B`, `K`, `M`, `G`, `T`) and at most one
/// decimal digit, which is dropped when zero: `0`, `512B`, `1K`, `1.5K`, `1M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl ByteSize {
    const UNITS: [(u64, &'static str); 4] = [
        (1 << 40, "T"),
        (1 << 30, "G"),
        (1 << 20, "M"),
        (1 << 10, "K"),
    ];
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0");
        }
        let (value, unit) = Self::UNITS
            .iter()
            .find(|(scale, _)| self.0 >= *scale)
            .map(|&(scale, unit)| (self.0 as f64 / scale as f64, unit))
            .unwrap_or((self.0 as f64, "B"));
        let value = format!("{:.1}", value);
        write!(f, "{}{}", value.strip_suffix(".0").unwrap_or(&value), unit)
    }
}
