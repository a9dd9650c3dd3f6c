use alloc::vec::Vec;

use crate::{AddressSpace, Geometry, RamChip, SectorCache, DEFAULT_BLOCK_BITS};

pub const FLASH_PAGE_SIZE: u32 = 256;
pub const FLASH_SECTOR_SIZE: u32 = 4096;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn make_space(num_chips: usize, geometry: Geometry) -> AddressSpace<RamChip> {
    let chips: Vec<RamChip> = (0..num_chips).map(|_| RamChip::new(geometry)).collect();
    AddressSpace::new(DEFAULT_BLOCK_BITS, chips).unwrap()
}

pub fn make_eeprom(num_chips: usize, chip_size: u32, page_size: u32) -> AddressSpace<RamChip> {
    make_space(num_chips, Geometry::eeprom(chip_size, page_size))
}

pub fn make_ram(num_chips: usize, chip_size: u32) -> AddressSpace<RamChip> {
    make_space(num_chips, Geometry::ram(chip_size))
}

pub fn make_flash(num_chips: usize, chip_size: u32) -> SectorCache<RamChip> {
    let geometry = Geometry::flash(chip_size, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE);
    SectorCache::new(make_space(num_chips, geometry)).unwrap()
}

pub fn clear_logs(chips: &mut [RamChip]) {
    for chip in chips {
        chip.clear_log();
    }
}
