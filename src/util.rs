use core::ops::{Range, RangeFrom, RangeFull, RangeTo};

use crate::error::ErrorKind;

/// A possibly open, possibly negative, byte slice of the array.
///
/// Negative indices count back from the end of the array. Only a step of 1
/// is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    pub const fn new(start: i64, stop: i64) -> Self {
        Slice {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    pub const fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Resolve against an array of `len` bytes into a half-open range.
    pub fn resolve(&self, len: u32) -> Result<Range<u32>, ErrorKind> {
        if !matches!(self.step, None | Some(1)) {
            return Err(ErrorKind::NotSupported);
        }
        let len = i64::from(len);
        let normalize = |idx: i64| if idx < 0 { len + idx } else { idx };
        let start = normalize(self.start.unwrap_or(0));
        let stop = normalize(self.stop.unwrap_or(len));
        if start < 0 || stop < start || stop > len {
            return Err(ErrorKind::AddressOutOfRange);
        }
        Ok(start as u32..stop as u32)
    }
}

impl From<Range<i64>> for Slice {
    fn from(range: Range<i64>) -> Self {
        Slice::new(range.start, range.end)
    }
}

impl From<RangeFrom<i64>> for Slice {
    fn from(range: RangeFrom<i64>) -> Self {
        Slice {
            start: Some(range.start),
            ..Slice::default()
        }
    }
}

impl From<RangeTo<i64>> for Slice {
    fn from(range: RangeTo<i64>) -> Self {
        Slice {
            stop: Some(range.end),
            ..Slice::default()
        }
    }
}

impl From<RangeFull> for Slice {
    fn from(_: RangeFull) -> Self {
        Slice::default()
    }
}

impl From<Range<u32>> for Slice {
    fn from(range: Range<u32>) -> Self {
        Slice::new(i64::from(range.start), i64::from(range.end))
    }
}

pub(crate) const fn align_down(addr: u32, granularity: u32) -> u32 {
    addr - addr % granularity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_positive() {
        assert_eq!(Slice::new(2, 10).resolve(100), Ok(2..10));
        assert_eq!(Slice::from(0i64..100).resolve(100), Ok(0..100));
        assert_eq!(Slice::from(5u32..5).resolve(100), Ok(5..5));
    }

    #[test]
    fn test_slice_open_ends() {
        assert_eq!(Slice::from(..).resolve(64), Ok(0..64));
        assert_eq!(Slice::from(10i64..).resolve(64), Ok(10..64));
        assert_eq!(Slice::from(..20i64).resolve(64), Ok(0..20));
    }

    #[test]
    fn test_slice_negative_indices() {
        assert_eq!(Slice::new(-10, -2).resolve(100), Ok(90..98));
        assert_eq!(Slice::from(-4i64..).resolve(100), Ok(96..100));
        assert_eq!(Slice::from(..-1i64).resolve(100), Ok(0..99));
    }

    #[test]
    fn test_slice_step() {
        assert_eq!(Slice::new(0, 4).step(1).resolve(8), Ok(0..4));
        assert_eq!(
            Slice::new(0, 4).step(2).resolve(8),
            Err(ErrorKind::NotSupported)
        );
        assert_eq!(
            Slice::new(4, 0).step(-1).resolve(8),
            Err(ErrorKind::NotSupported)
        );
    }

    #[test]
    fn test_slice_out_of_range() {
        assert_eq!(Slice::new(0, 9).resolve(8), Err(ErrorKind::AddressOutOfRange));
        assert_eq!(Slice::new(-9, 4).resolve(8), Err(ErrorKind::AddressOutOfRange));
        assert_eq!(Slice::new(6, 2).resolve(8), Err(ErrorKind::AddressOutOfRange));
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, 4096), 0);
        assert_eq!(align_down(4095, 4096), 0);
        assert_eq!(align_down(4096, 4096), 4096);
        assert_eq!(align_down(10_000, 4096), 8192);
    }
}
