//! In-memory chip model.
//!
//! `RamChip` behaves like an EEPROM, FRAM/SPI RAM or NOR flash chip depending
//! on its [`Geometry`]. Flash programming can only clear bits, so data written
//! over an unerased sector comes back corrupted, as it would on real parts.
//! Every operation is recorded so callers can check exactly what reached the
//! chip.

use alloc::vec;
use alloc::vec::Vec;
use embedded_hal::delay::DelayNs;
use log::trace;

use crate::chip::{wait_ready, Chip, Geometry};
use crate::error::ErrorKind;
use crate::READY_TIMEOUT_MS;

/// A delay that only keeps count of the time it was asked to wait.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimDelay {
    elapsed_ns: u64,
}

impl SimDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ns += u64::from(ms) * 1_000_000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipOp {
    Read { addr: u32, len: usize },
    Program { addr: u32, len: usize },
    Erase { addr: u32 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChipStats {
    pub reads: usize,
    pub programs: usize,
    pub erases: usize,
}

pub struct RamChip {
    geometry: Geometry,
    mem: Vec<u8>,
    log: Vec<ChipOp>,
    present: bool,
    busy_polls: u32,
    busy_remaining: u32,
    stuck: bool,
    program_fault: Option<usize>,
    delay: SimDelay,
}

impl RamChip {
    /// A blank chip, every byte at the erased value.
    pub fn new(geometry: Geometry) -> Self {
        let mem = vec![geometry.erased_value; geometry.chip_size as usize];
        RamChip::from_bytes(geometry, mem)
    }

    /// A chip preloaded with `bytes`, padded or truncated to the chip size.
    pub fn from_bytes(geometry: Geometry, mut bytes: Vec<u8>) -> Self {
        bytes.resize(geometry.chip_size as usize, geometry.erased_value);
        RamChip {
            geometry,
            mem: bytes,
            log: Vec::new(),
            present: true,
            busy_polls: 0,
            busy_remaining: 0,
            stuck: false,
            program_fault: None,
            delay: SimDelay::default(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.mem
    }

    pub fn log(&self) -> &[ChipOp] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn stats(&self) -> ChipStats {
        let mut stats = ChipStats::default();
        for op in &self.log {
            match op {
                ChipOp::Read { .. } => stats.reads += 1,
                ChipOp::Program { .. } => stats.programs += 1,
                ChipOp::Erase { .. } => stats.erases += 1,
            }
        }
        stats
    }

    /// Whether the chip answers its presence probe.
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    /// Number of status polls the chip stays busy after a program or erase.
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    /// A stuck chip never leaves the busy state.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    /// Fail the `n`th page program from now, and every one after it, with
    /// `ErrorKind::Bus` until [`clear_faults`](RamChip::clear_faults).
    pub fn fail_program_at(&mut self, n: usize) {
        self.program_fault = Some(n);
    }

    pub fn clear_faults(&mut self) {
        self.program_fault = None;
        self.stuck = false;
    }

    /// Simulated time spent waiting for the chip to become ready.
    pub fn busy_ms(&self) -> u64 {
        self.delay.elapsed_ms()
    }

    fn wait_ready(&mut self) -> Result<(), ErrorKind> {
        let stuck = self.stuck;
        let remaining = &mut self.busy_remaining;
        wait_ready(&mut self.delay, READY_TIMEOUT_MS, || {
            if stuck {
                return Ok(true);
            }
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(true);
            }
            Ok(false)
        })
    }

    fn check_span(&self, addr: u32, len: usize, paged: bool) -> Result<(), ErrorKind> {
        let end = u64::from(addr) + len as u64;
        if end > u64::from(self.geometry.chip_size) {
            return Err(ErrorKind::AddressOutOfRange);
        }
        if paged && len > 0 {
            let page = self.geometry.page_size;
            if addr / page != (end as u32 - 1) / page {
                return Err(ErrorKind::NotSupported);
            }
        }
        Ok(())
    }
}

impl Chip for RamChip {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ErrorKind> {
        self.check_span(addr, buf.len(), self.geometry.paged_reads)?;
        self.wait_ready()?;
        trace!("ram rd addr: 0x{:x} len: {}", addr, buf.len());
        self.log.push(ChipOp::Read {
            addr,
            len: buf.len(),
        });
        let start = addr as usize;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }

    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind> {
        self.check_span(addr, data.len(), true)?;
        self.wait_ready()?;
        if let Some(n) = self.program_fault {
            if n <= 1 {
                log::error!("ram wr addr: 0x{:x} injected bus fault", addr);
                return Err(ErrorKind::Bus);
            }
            self.program_fault = Some(n - 1);
        }
        trace!("ram wr addr: 0x{:x} len: {}", addr, data.len());
        self.log.push(ChipOp::Program {
            addr,
            len: data.len(),
        });
        let start = addr as usize;
        let dest = &mut self.mem[start..start + data.len()];
        if self.geometry.has_sectors() {
            for (d, s) in dest.iter_mut().zip(data) {
                *d &= *s;
            }
        } else {
            dest.copy_from_slice(data);
        }
        self.busy_remaining = self.busy_polls;
        Ok(())
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), ErrorKind> {
        if !self.geometry.has_sectors() {
            return Err(ErrorKind::NotSupported);
        }
        let sector_size = self.geometry.sector_size;
        if addr % sector_size != 0 {
            return Err(ErrorKind::NotSupported);
        }
        self.check_span(addr, sector_size as usize, false)?;
        self.wait_ready()?;
        trace!("ram erase addr: 0x{:x}", addr);
        self.log.push(ChipOp::Erase { addr });
        let start = addr as usize;
        let erased_value = self.geometry.erased_value;
        self.mem[start..start + sector_size as usize].fill(erased_value);
        self.busy_remaining = self.busy_polls;
        Ok(())
    }

    fn probe(&mut self) -> Result<(), ErrorKind> {
        if self.present {
            Ok(())
        } else {
            Err(ErrorKind::ChipNotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chip_is_erased() {
        let chip = RamChip::new(Geometry::flash(8192, 256, 4096));
        assert!(chip.as_bytes().iter().all(|b| *b == 0xff));
        let chip = RamChip::new(Geometry::ram(1024).with_erased_value(0));
        assert!(chip.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_flash_program_clears_bits_only() {
        let mut chip = RamChip::new(Geometry::flash(8192, 256, 4096));
        chip.page_program(0, &[0x0f]).unwrap();
        chip.page_program(0, &[0xf0]).unwrap();
        assert_eq!(chip.as_bytes()[0], 0x00);
        chip.sector_erase(0).unwrap();
        chip.page_program(0, &[0xf0]).unwrap();
        assert_eq!(chip.as_bytes()[0], 0xf0);
    }

    #[test]
    fn test_eeprom_program_overwrites() {
        let mut chip = RamChip::new(Geometry::eeprom(1024, 64));
        chip.page_program(10, &[0x0f]).unwrap();
        chip.page_program(10, &[0xf0]).unwrap();
        assert_eq!(chip.as_bytes()[10], 0xf0);
        assert_eq!(chip.sector_erase(0), Err(ErrorKind::NotSupported));
    }

    #[test]
    fn test_page_crossing_rejected() {
        let mut chip = RamChip::new(Geometry::eeprom(1024, 64));
        assert_eq!(chip.page_program(60, &[0u8; 8]), Err(ErrorKind::NotSupported));
        let mut buf = [0u8; 8];
        assert_eq!(chip.read(60, &mut buf), Err(ErrorKind::NotSupported));
        assert_eq!(chip.read(1020, &mut buf), Err(ErrorKind::AddressOutOfRange));
        assert!(chip.log().is_empty());
    }

    #[test]
    fn test_unaligned_sector_erase_rejected() {
        let mut chip = RamChip::new(Geometry::flash(8192, 256, 4096));
        assert_eq!(chip.sector_erase(100), Err(ErrorKind::NotSupported));
    }

    #[test]
    fn test_chip_erase_walks_sectors() {
        let mut chip = RamChip::new(Geometry::flash(16384, 256, 4096));
        chip.page_program(5000, &[0u8; 16]).unwrap();
        chip.clear_log();
        chip.chip_erase().unwrap();
        assert_eq!(chip.stats().erases, 4);
        assert!(chip.as_bytes().iter().all(|b| *b == 0xff));
    }

    #[test]
    fn test_busy_chip_is_waited_for() {
        let mut chip = RamChip::new(Geometry::ram(1024));
        chip.set_busy_polls(3);
        chip.page_program(0, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        chip.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(chip.busy_ms(), 3);
    }

    #[test]
    fn test_stuck_chip_times_out() {
        let mut chip = RamChip::new(Geometry::ram(1024));
        chip.set_stuck(true);
        assert_eq!(chip.page_program(0, &[1]), Err(ErrorKind::DeviceTimeout));
        assert_eq!(chip.busy_ms(), u64::from(READY_TIMEOUT_MS));
        assert_eq!(chip.as_bytes()[0], 0xff);
    }

    #[test]
    fn test_program_fault() {
        let mut chip = RamChip::new(Geometry::flash(8192, 256, 4096));
        chip.fail_program_at(2);
        chip.page_program(0, &[0x00]).unwrap();
        assert_eq!(chip.page_program(256, &[0x00]), Err(ErrorKind::Bus));
        assert_eq!(chip.page_program(512, &[0x00]), Err(ErrorKind::Bus));
        assert_eq!(chip.stats().programs, 1);
        assert_eq!(chip.as_bytes()[256], 0xff);

        chip.clear_faults();
        chip.page_program(256, &[0x00]).unwrap();
        assert_eq!(chip.as_bytes()[256], 0x00);
    }

    #[test]
    fn test_from_bytes_pads_to_chip_size() {
        let chip = RamChip::from_bytes(Geometry::ram(16), vec![1, 2, 3]);
        assert_eq!(chip.as_bytes().len(), 16);
        assert_eq!(&chip.as_bytes()[..4], &[1, 2, 3, 0xff]);
    }

    #[test]
    fn test_probe() {
        let mut chip = RamChip::new(Geometry::ram(16));
        assert_eq!(chip.probe(), Ok(()));
        chip.set_present(false);
        assert_eq!(chip.probe(), Err(ErrorKind::ChipNotFound));
    }
}
