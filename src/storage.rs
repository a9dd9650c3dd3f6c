use alloc::vec;
use alloc::vec::Vec;

use crate::error::ErrorKind;
use crate::util::Slice;

/// Block device control operations, numbered as in the usual block device ioctl protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Init = 1,
    Deinit = 2,
    Synchronize = 3,
    SectorCount = 4,
    SectorSize = 5,
    Erase = 6,
}

impl TryFrom<u32> for ControlOp {
    type Error = ErrorKind;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ControlOp::Init),
            2 => Ok(ControlOp::Deinit),
            3 => Ok(ControlOp::Synchronize),
            4 => Ok(ControlOp::SectorCount),
            5 => Ok(ControlOp::SectorSize),
            6 => Ok(ControlOp::Erase),
            _ => Err(ErrorKind::NotSupported),
        }
    }
}

/// Fail unless `[addr, addr + nbytes)` lies inside an array of `len` bytes.
///
/// An access starting at `len` fails even when it is empty.
pub(crate) fn check_bounds(len: u32, addr: u32, nbytes: usize) -> Result<(), ErrorKind> {
    if addr >= len || nbytes as u64 > u64::from(len - addr) {
        log::error!(
            "Address out of range: addr: 0x{:x} nbytes: {} len: 0x{:x}",
            addr,
            nbytes,
            len
        );
        return Err(ErrorKind::AddressOutOfRange);
    }
    Ok(())
}

/// Linear byte array as seen by a filesystem.
pub trait Storage {
    /// Size of the array in bytes.
    fn len(&self) -> u32;

    /// log2 of the virtual block size.
    fn block_bits(&self) -> u32;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ErrorKind>;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind>;

    /// Push any buffered data to the chips.
    fn sync(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }

    /// Handler for `ControlOp::Erase`.
    fn erase_block(&mut self, _block: u32) -> Result<u32, ErrorKind> {
        Ok(0)
    }

    fn block_size(&self) -> u32 {
        1 << self.block_bits()
    }

    fn read_byte(&mut self, addr: u32) -> Result<u8, ErrorKind> {
        let mut byte = [0u8; 1];
        self.read(addr, &mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), ErrorKind> {
        self.write(addr, &[value])
    }

    fn read_range(&mut self, slice: Slice) -> Result<Vec<u8>, ErrorKind> {
        let range = slice.resolve(self.len())?;
        let mut buf = vec![0u8; range.len()];
        if !buf.is_empty() {
            self.read(range.start, &mut buf)?;
        }
        Ok(buf)
    }

    /// Read a slice into `buf`, which must match the slice length.
    fn read_range_into(&mut self, slice: Slice, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let range = slice.resolve(self.len())?;
        if buf.len() != range.len() {
            return Err(ErrorKind::LengthMismatch);
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.read(range.start, buf)
    }

    fn write_range(&mut self, slice: Slice, data: &[u8]) -> Result<(), ErrorKind> {
        let range = slice.resolve(self.len())?;
        if data.len() != range.len() {
            log::error!(
                "Slice of {} bytes assigned {} bytes of data.",
                range.len(),
                data.len()
            );
            return Err(ErrorKind::LengthMismatch);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.write(range.start, data)
    }

    fn read_blocks(&mut self, block: u32, buf: &mut [u8], offset: u32) -> Result<(), ErrorKind> {
        let addr = block_address(block, self.block_bits(), offset)?;
        self.read(addr, buf)
    }

    fn write_blocks(&mut self, block: u32, data: &[u8], offset: u32) -> Result<(), ErrorKind> {
        let addr = block_address(block, self.block_bits(), offset)?;
        self.write(addr, data)
    }

    fn control(&mut self, op: ControlOp, arg: u32) -> Result<Option<u32>, ErrorKind> {
        log::debug!("control op: {:?} arg: {}", op, arg);
        match op {
            ControlOp::Init => Ok(Some(0)),
            ControlOp::Deinit | ControlOp::Synchronize => {
                self.sync()?;
                Ok(Some(0))
            }
            ControlOp::SectorCount => Ok(Some(self.len() >> self.block_bits())),
            ControlOp::SectorSize => Ok(Some(self.block_size())),
            ControlOp::Erase => self.erase_block(arg).map(Some),
        }
    }

    /// `control` keyed by the numeric operation code. Unknown codes yield `None`.
    fn control_code(&mut self, code: u32, arg: u32) -> Result<Option<u32>, ErrorKind> {
        match ControlOp::try_from(code) {
            Ok(op) => self.control(op, arg),
            Err(_) => {
                log::debug!("ignoring unknown control code: {}", code);
                Ok(None)
            }
        }
    }
}

fn block_address(block: u32, block_bits: u32, offset: u32) -> Result<u32, ErrorKind> {
    let addr = (u64::from(block) << block_bits) + u64::from(offset);
    u32::try_from(addr).map_err(|_| ErrorKind::AddressOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_op_codes() {
        assert_eq!(ControlOp::try_from(3), Ok(ControlOp::Synchronize));
        assert_eq!(ControlOp::try_from(4), Ok(ControlOp::SectorCount));
        assert_eq!(ControlOp::try_from(5), Ok(ControlOp::SectorSize));
        assert_eq!(ControlOp::try_from(6), Ok(ControlOp::Erase));
        assert_eq!(ControlOp::try_from(0), Err(ErrorKind::NotSupported));
        assert_eq!(ControlOp::try_from(7), Err(ErrorKind::NotSupported));
        assert_eq!(ControlOp::Erase as u32, 6);
    }

    #[test]
    fn test_check_bounds() {
        assert_eq!(check_bounds(100, 0, 100), Ok(()));
        assert_eq!(check_bounds(100, 99, 1), Ok(()));
        assert_eq!(check_bounds(100, 50, 0), Ok(()));
        assert_eq!(check_bounds(100, 99, 2), Err(ErrorKind::AddressOutOfRange));
        assert_eq!(check_bounds(100, 100, 0), Err(ErrorKind::AddressOutOfRange));
        assert_eq!(check_bounds(100, 100, 1), Err(ErrorKind::AddressOutOfRange));
    }

    #[test]
    fn test_block_address() {
        assert_eq!(block_address(0, 9, 0), Ok(0));
        assert_eq!(block_address(3, 9, 17), Ok(3 * 512 + 17));
        assert_eq!(
            block_address(u32::MAX, 9, 0),
            Err(ErrorKind::AddressOutOfRange)
        );
    }
}
