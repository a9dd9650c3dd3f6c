use crate::error::ErrorKind;
use crate::{ERASED_VALUE, READY_TIMEOUT_MS};
use embedded_hal::delay::DelayNs;

/// Physical layout of a single chip. Every chip of an array shares one geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Size of the chip in bytes.
    pub chip_size: u32,
    /// Program granularity. Writes never cross a page boundary.
    pub page_size: u32,
    /// Erase granularity, or 0 for media that is written in place.
    pub sector_size: u32,
    /// Byte value of erased memory.
    pub erased_value: u8,
    /// Raw reads must also stay inside one page.
    pub paged_reads: bool,
}

impl Geometry {
    /// EEPROM style device: byte writable, page bounded reads and writes.
    pub const fn eeprom(chip_size: u32, page_size: u32) -> Self {
        Geometry {
            chip_size,
            page_size,
            sector_size: 0,
            erased_value: ERASED_VALUE,
            paged_reads: true,
        }
    }

    /// FRAM and SPI RAM: the whole chip behaves as one page.
    pub const fn ram(chip_size: u32) -> Self {
        Geometry {
            chip_size,
            page_size: chip_size,
            sector_size: 0,
            erased_value: ERASED_VALUE,
            paged_reads: false,
        }
    }

    /// NOR flash: erase before write, raw reads may span the chip.
    pub const fn flash(chip_size: u32, page_size: u32, sector_size: u32) -> Self {
        Geometry {
            chip_size,
            page_size,
            sector_size,
            erased_value: ERASED_VALUE,
            paged_reads: false,
        }
    }

    pub const fn with_erased_value(mut self, erased_value: u8) -> Self {
        self.erased_value = erased_value;
        self
    }

    pub const fn has_sectors(&self) -> bool {
        self.sector_size != 0
    }

    pub(crate) fn is_consistent(&self) -> bool {
        if self.chip_size == 0 || self.page_size == 0 || self.chip_size % self.page_size != 0 {
            return false;
        }
        if self.has_sectors() {
            // Sector flushes read whole sectors, which paged reads cannot do.
            return !self.paged_reads
                && self.sector_size >= self.page_size
                && self.sector_size % self.page_size == 0
                && self.chip_size % self.sector_size == 0;
        }
        true
    }
}

/// Raw access to one physical chip. Addresses are offsets into that chip only.
///
/// The caller keeps every request inside one addressing unit: a page for
/// `page_program` (and for `read` when the geometry has `paged_reads`),
/// one sector-aligned address for `sector_erase`.
pub trait Chip {
    fn geometry(&self) -> Geometry;

    /// Fill `buf` with the chip contents starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ErrorKind>;

    /// Write up to one page of data starting at `addr`.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind>;

    /// Set one sector to the erased value. `addr` is the start of the sector.
    fn sector_erase(&mut self, _addr: u32) -> Result<(), ErrorKind> {
        Err(ErrorKind::NotSupported)
    }

    /// Erase the whole chip.
    fn chip_erase(&mut self) -> Result<(), ErrorKind> {
        let geometry = self.geometry();
        if !geometry.has_sectors() {
            return Err(ErrorKind::NotSupported);
        }
        for addr in (0..geometry.chip_size).step_by(geometry.sector_size as usize) {
            self.sector_erase(addr)?;
        }
        Ok(())
    }

    /// Check that the chip is present and answers as expected.
    fn probe(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

/// Poll `busy` at 1ms intervals until it reports ready.
///
/// Fails with `DeviceTimeout` once `timeout_ms` polls have elapsed.
pub fn wait_ready<D, F>(delay: &mut D, timeout_ms: u32, mut busy: F) -> Result<(), ErrorKind>
where
    D: DelayNs,
    F: FnMut() -> Result<bool, ErrorKind>,
{
    let mut waited = 0;
    while busy()? {
        if waited >= timeout_ms {
            log::error!("Device not ready after {}ms.", waited);
            return Err(ErrorKind::DeviceTimeout);
        }
        delay.delay_ms(1);
        waited += 1;
    }
    Ok(())
}

/// `wait_ready` with the default bound.
pub fn wait_ready_default<D, F>(delay: &mut D, busy: F) -> Result<(), ErrorKind>
where
    D: DelayNs,
    F: FnMut() -> Result<bool, ErrorKind>,
{
    wait_ready(delay, READY_TIMEOUT_MS, busy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::SimDelay;
    use crate::tests_util::*;

    #[test]
    fn test_geometry_consistency() {
        assert!(Geometry::eeprom(65536, 128).is_consistent());
        assert!(Geometry::ram(524288).is_consistent());
        assert!(Geometry::flash(16 * 1024 * 1024, 256, 4096).is_consistent());

        assert!(!Geometry::eeprom(0, 128).is_consistent());
        assert!(!Geometry::eeprom(1000, 128).is_consistent());
        assert!(!Geometry::flash(65536, 256, 128).is_consistent());
        assert!(!Geometry::flash(65536, 256, 4000).is_consistent());
        assert!(!Geometry::flash(65536 + 256, 256, 4096).is_consistent());

        let mut paged_flash = Geometry::flash(65536, 256, 4096);
        paged_flash.paged_reads = true;
        assert!(!paged_flash.is_consistent());
    }

    #[test]
    fn test_wait_ready_returns_once_idle() {
        init();
        let mut delay = SimDelay::default();
        let mut polls = 0;
        wait_ready(&mut delay, 10, || {
            polls += 1;
            Ok(polls < 4)
        })
        .unwrap();
        assert_eq!(polls, 4);
        assert_eq!(delay.elapsed_ms(), 3);
    }

    #[test]
    fn test_wait_ready_times_out() {
        init();
        let mut delay = SimDelay::default();
        let res = wait_ready(&mut delay, 5, || Ok(true));
        assert_eq!(res, Err(ErrorKind::DeviceTimeout));
        assert_eq!(delay.elapsed_ms(), 5);
    }

    #[test]
    fn test_wait_ready_propagates_poll_errors() {
        let mut delay = SimDelay::default();
        let res = wait_ready_default(&mut delay, || Err(ErrorKind::Bus));
        assert_eq!(res, Err(ErrorKind::Bus));
        assert_eq!(delay.elapsed_ms(), 0);
    }
}
