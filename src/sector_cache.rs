use alloc::vec;
use alloc::vec::Vec;
use log::{debug, error, info, trace};

use crate::address_space::AddressSpace;
use crate::chip::Chip;
use crate::error::ErrorKind;
use crate::storage::{check_bounds, Storage};
use crate::util::align_down;

/// Write-back cache of one sector, for media that must be erased before it
/// is written.
///
/// Writes land in the cached sector and reach the chip only when a write
/// needs a different sector or on [`sync`](SectorCache::sync). Reads merge
/// the cached bytes with direct chip reads. Data still in the cache when the
/// device is dropped is lost; call `sync` first.
pub struct SectorCache<C: Chip> {
    space: AddressSpace<C>,
    cache: Vec<u8>,
    cached_base: Option<u32>,
    dirty: bool,
}

impl<C: Chip> SectorCache<C> {
    /// Wrap `space` and cache the sector holding address 0.
    pub fn new(space: AddressSpace<C>) -> Result<Self, ErrorKind> {
        let geometry = space.geometry();
        if !geometry.has_sectors() {
            error!("Sector cache over media without sectors: {:?}", geometry);
            return Err(ErrorKind::NotSupported);
        }
        let mut device = SectorCache {
            space,
            cache: vec![geometry.erased_value; geometry.sector_size as usize],
            cached_base: None,
            dirty: false,
        };
        device.initialise()?;
        Ok(device)
    }

    /// Reload the sector holding address 0. Pending writes are discarded.
    pub fn initialise(&mut self) -> Result<(), ErrorKind> {
        self.dirty = false;
        self.load(0)
    }

    pub fn sector_size(&self) -> u32 {
        self.space.geometry().sector_size
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Start address of the cached sector, `None` after a failed reload.
    pub fn cached_base(&self) -> Option<u32> {
        self.cached_base
    }

    pub fn space(&self) -> &AddressSpace<C> {
        &self.space
    }

    pub fn chips(&self) -> &[C] {
        self.space.chips()
    }

    /// Direct access to the chips. Changing their contents here bypasses the cache.
    pub fn chips_mut(&mut self) -> &mut [C] {
        self.space.chips_mut()
    }

    /// Flush pending writes and hand back the underlying array.
    pub fn into_inner(mut self) -> Result<AddressSpace<C>, ErrorKind> {
        self.sync()?;
        Ok(self.space)
    }

    /// True if the sector holding `addr` reads as erased on the chip.
    pub fn is_empty(&mut self, addr: u32) -> Result<bool, ErrorKind> {
        let erased_value = self.space.geometry().erased_value;
        self.is_empty_with(addr, erased_value)
    }

    pub fn is_empty_with(&mut self, addr: u32, erased_value: u8) -> Result<bool, ErrorKind> {
        self.space.is_empty(addr, erased_value)
    }

    /// Erase the whole array and recache sector 0.
    pub fn erase(&mut self) -> Result<(), ErrorKind> {
        info!("Erasing {} bytes.", self.space.len());
        self.dirty = false;
        self.cached_base = None;
        self.space.erase_chips()?;
        self.initialise()
    }

    fn load(&mut self, addr: u32) -> Result<(), ErrorKind> {
        debug_assert!(!self.dirty);
        let base = align_down(addr, self.sector_size());
        debug!("cache load sector: 0x{:x}", base);
        // The buffer is garbage until the read completes.
        self.cached_base = None;
        self.space.read(base, &mut self.cache)?;
        self.cached_base = Some(base);
        Ok(())
    }

    /// Write the cache back to the sector at `base`.
    fn flush(&mut self, base: u32) -> Result<(), ErrorKind> {
        let geometry = self.space.geometry();
        if self.space.is_empty(base, geometry.erased_value)? {
            debug!("flush sector: 0x{:x} already erased", base);
        } else {
            debug!("flush sector: 0x{:x} erasing", base);
            self.space.erase_sector(base)?;
        }

        let page_size = geometry.page_size as usize;
        for (n, page) in self.cache.chunks(page_size).enumerate() {
            self.space.program_page(base + (n * page_size) as u32, page)?;
        }
        self.dirty = false;
        Ok(())
    }
}

impl<C: Chip> Storage for SectorCache<C> {
    fn len(&self) -> u32 {
        self.space.len()
    }

    fn block_bits(&self) -> u32 {
        self.space.block_bits()
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ErrorKind> {
        check_bounds(self.len(), addr, buf.len())?;
        let base = match self.cached_base {
            Some(base) => base,
            None => return self.space.read(addr, buf),
        };
        let cache_end = base + self.sector_size();
        let end = addr + buf.len() as u32;
        if end <= base || addr >= cache_end {
            return self.space.read(addr, buf);
        }

        let mut pos = 0;
        if addr < base {
            pos = (base - addr) as usize;
            self.space.read(addr, &mut buf[..pos])?;
        }
        let start = core::cmp::max(addr, base);
        let stop = core::cmp::min(end, cache_end);
        let n = (stop - start) as usize;
        trace!("cache rd addr: 0x{:x} len: {}", start, n);
        let offset = (start - base) as usize;
        buf[pos..pos + n].copy_from_slice(&self.cache[offset..offset + n]);
        pos += n;
        if end > cache_end {
            self.space.read(cache_end, &mut buf[pos..])?;
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind> {
        check_bounds(self.len(), addr, data.len())?;
        let sector_size = self.sector_size();
        let mut addr = addr;
        let mut pos = 0;
        while pos < data.len() {
            let base = align_down(addr, sector_size);
            if self.cached_base != Some(base) {
                debug!("cache miss: 0x{:x} cached: {:x?}", base, self.cached_base);
                // Flushes even when the new range overlaps the evicted sector.
                self.sync()?;
                self.load(base)?;
            }
            let offset = (addr - base) as usize;
            let n = core::cmp::min(data.len() - pos, sector_size as usize - offset);
            trace!("cache wr addr: 0x{:x} len: {}", addr, n);
            self.cache[offset..offset + n].copy_from_slice(&data[pos..pos + n]);
            self.dirty = true;
            pos += n;
            addr += n as u32;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<(), ErrorKind> {
        if !self.dirty {
            return Ok(());
        }
        match self.cached_base {
            Some(base) => self.flush(base),
            None => Ok(()),
        }
    }
}
