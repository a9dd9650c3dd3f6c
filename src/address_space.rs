use alloc::vec::Vec;
use log::{debug, error, info, trace, warn};

use crate::chip::{Chip, Geometry};
use crate::error::ErrorKind;
use crate::storage::{check_bounds, Storage};
use crate::util::align_down;
use crate::EMPTY_PROBE_CHUNK;

/// One or more identical chips presented as a single linear array.
///
/// Every access is split into runs that stay inside one page (or one chip,
/// for media that does not page the operation) before it reaches a chip.
/// Nothing is buffered at this level; erase-before-write media should be
/// accessed through a [`SectorCache`](crate::SectorCache).
pub struct AddressSpace<C: Chip> {
    chips: Vec<C>,
    geometry: Geometry,
    block_bits: u32,
    size: u32,
}

impl<C: Chip> AddressSpace<C> {
    /// Validate and probe `chips`, which are concatenated in order.
    pub fn new(block_bits: u32, mut chips: Vec<C>) -> Result<Self, ErrorKind> {
        let geometry = match chips.first() {
            Some(chip) => chip.geometry(),
            None => {
                error!("No chips in array.");
                return Err(ErrorKind::ChipNotFound);
            }
        };
        if !geometry.is_consistent() {
            error!("Unusable chip geometry: {:?}", geometry);
            return Err(ErrorKind::HardwareMismatch);
        }
        if block_bits >= u32::BITS {
            error!("Virtual block size of 2^{} bytes.", block_bits);
            return Err(ErrorKind::NotSupported);
        }

        for (n, chip) in chips.iter_mut().enumerate() {
            if chip.geometry() != geometry {
                error!("Chip {} geometry differs from chip 0: {:?}", n, chip.geometry());
                return Err(ErrorKind::HardwareMismatch);
            }
            if let Err(e) = chip.probe() {
                error!("Chip not found at index {}: {}", n, e);
                return Err(e);
            }
        }

        let size = u32::try_from(chips.len())
            .ok()
            .and_then(|n| n.checked_mul(geometry.chip_size))
            .ok_or_else(|| {
                error!("Array of {} chips exceeds the address range.", chips.len());
                ErrorKind::HardwareMismatch
            })?;
        info!("{} chips detected. Total size {} bytes.", chips.len(), size);

        Ok(AddressSpace {
            chips,
            geometry,
            block_bits,
            size,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn num_chips(&self) -> usize {
        self.chips.len()
    }

    pub fn chips(&self) -> &[C] {
        &self.chips
    }

    pub fn chips_mut(&mut self) -> &mut [C] {
        &mut self.chips
    }

    pub fn into_chips(self) -> Vec<C> {
        self.chips
    }

    /// Chip index and offset into that chip for a logical address.
    pub fn locate(&self, addr: u32) -> Result<(usize, u32), ErrorKind> {
        if addr >= self.size {
            return Err(ErrorKind::AddressOutOfRange);
        }
        let chip_size = self.geometry.chip_size;
        Ok(((addr / chip_size) as usize, addr % chip_size))
    }

    /// Number of bytes of a `nbytes` access at `addr` that fit in the current
    /// page, or in the current chip when `paged` is false.
    pub fn run_len(&self, addr: u32, nbytes: usize, paged: bool) -> usize {
        let unit = if paged {
            self.geometry.page_size
        } else {
            self.geometry.chip_size
        };
        let room = unit - addr % unit;
        core::cmp::min(nbytes, room as usize)
    }

    /// Read in chip sized runs. Media with paged reads gets `NotSupported`.
    pub fn read_raw(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ErrorKind> {
        if self.geometry.paged_reads {
            return Err(ErrorKind::NotSupported);
        }
        self.read(addr, buf)
    }

    /// Program one page worth of data. The run must not cross a page.
    pub(crate) fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind> {
        let (chip, offset) = self.locate(addr)?;
        if self.run_len(addr, data.len(), true) != data.len() {
            return Err(ErrorKind::NotSupported);
        }
        trace!("program chip: {} offset: 0x{:x} len: {}", chip, offset, data.len());
        self.chips[chip].page_program(offset, data)
    }

    /// Erase the sector starting at `addr`.
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), ErrorKind> {
        if !self.geometry.has_sectors() {
            return Err(ErrorKind::NotSupported);
        }
        let (chip, offset) = self.locate(addr)?;
        if offset % self.geometry.sector_size != 0 {
            error!("Sector erase at unaligned address 0x{:x}", addr);
            return Err(ErrorKind::NotSupported);
        }
        debug!("erase chip: {} sector: 0x{:x}", chip, offset);
        self.chips[chip].sector_erase(offset)
    }

    /// True if every byte of the sector holding `addr` reads as `erased_value`.
    ///
    /// Reads straight from the chip in small chunks and stops at the first
    /// mismatch.
    pub fn is_empty(&mut self, addr: u32, erased_value: u8) -> Result<bool, ErrorKind> {
        if !self.geometry.has_sectors() {
            return Err(ErrorKind::NotSupported);
        }
        let sector_size = self.geometry.sector_size;
        let base = align_down(addr, sector_size);
        check_bounds(self.size, base, sector_size as usize)?;

        let mut chunk = [0u8; EMPTY_PROBE_CHUNK];
        let mut pos = 0;
        while pos < sector_size {
            let n = core::cmp::min(EMPTY_PROBE_CHUNK as u32, sector_size - pos) as usize;
            self.read_raw(base + pos, &mut chunk[..n])?;
            if chunk[..n].iter().any(|b| *b != erased_value) {
                return Ok(false);
            }
            pos += n as u32;
        }
        Ok(true)
    }

    /// Erase every chip of the array.
    pub fn erase_chips(&mut self) -> Result<(), ErrorKind> {
        for (n, chip) in self.chips.iter_mut().enumerate() {
            info!("Erasing chip {}.", n);
            chip.chip_erase()?;
        }
        Ok(())
    }

    /// Overwrite the whole array with `fill`, the way byte writable media is erased.
    pub fn erase(&mut self, fill: u8) -> Result<(), ErrorKind> {
        if self.geometry.has_sectors() {
            warn!("Filling erase-before-write media with 0x{:x}; bits can only be cleared.", fill);
        }
        info!("Filling {} bytes with 0x{:x}.", self.size, fill);
        let block = [fill; 256];
        let mut addr = 0;
        while addr < self.size {
            let n = core::cmp::min(block.len() as u32, self.size - addr);
            self.write(addr, &block[..n as usize])?;
            addr += n;
        }
        Ok(())
    }
}

impl<C: Chip> Storage for AddressSpace<C> {
    fn len(&self) -> u32 {
        self.size
    }

    fn block_bits(&self) -> u32 {
        self.block_bits
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ErrorKind> {
        check_bounds(self.size, addr, buf.len())?;
        let mut addr = addr;
        let mut pos = 0;
        while pos < buf.len() {
            let (chip, offset) = self.locate(addr)?;
            let n = self.run_len(addr, buf.len() - pos, self.geometry.paged_reads);
            trace!("read chip: {} offset: 0x{:x} len: {}", chip, offset, n);
            self.chips[chip].read(offset, &mut buf[pos..pos + n])?;
            pos += n;
            addr += n as u32;
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind> {
        check_bounds(self.size, addr, data.len())?;
        let mut addr = addr;
        let mut pos = 0;
        while pos < data.len() {
            let n = self.run_len(addr, data.len() - pos, true);
            self.program_page(addr, &data[pos..pos + n])?;
            pos += n;
            addr += n as u32;
        }
        Ok(())
    }
}
