use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Address or range lies outside the array.
    AddressOutOfRange,
    /// Range write whose data length differs from the target range.
    LengthMismatch,
    /// Operation or slice step the device cannot perform.
    NotSupported,
    /// Chip readiness poll exceeded its bound.
    DeviceTimeout,
    /// A chip did not answer its presence probe.
    ChipNotFound,
    /// Chips disagree on geometry, or the geometry is unusable.
    HardwareMismatch,
    /// Transport failure reported by a chip driver.
    Bus,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ErrorKind::AddressOutOfRange => "address out of range",
            ErrorKind::LengthMismatch => "slice must have same length as data",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::DeviceTimeout => "device ready timeout",
            ErrorKind::ChipNotFound => "chip not found",
            ErrorKind::HardwareMismatch => "hardware mismatch",
            ErrorKind::Bus => "bus error",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ErrorKind {}
