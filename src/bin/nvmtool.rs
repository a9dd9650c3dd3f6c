use log::LevelFilter;
use log::{debug, error, info, warn};
use nvarray::{
    AddressSpace, ControlOp, ErrorKind, Geometry, RamChip, SectorCache, Slice, Storage,
    ERASED_VALUE,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use structopt::StructOpt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChipKind {
    Flash,
    Eeprom,
    Ram,
}

impl FromStr for ChipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flash" => Ok(ChipKind::Flash),
            "eeprom" => Ok(ChipKind::Eeprom),
            "ram" | "fram" | "spiram" => Ok(ChipKind::Ram),
            _ => Err(format!("unknown chip kind: {}", s)),
        }
    }
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[derive(StructOpt)]
#[structopt(name = "nvmtool", about = "Inspect and modify chip array images.")]
struct Opt {
    /// Image file holding every chip back to back. Created when missing.
    #[structopt(parse(from_os_str))]
    image: PathBuf,

    /// flash, eeprom or ram
    #[structopt(short, long, default_value = "flash")]
    kind: ChipKind,

    #[structopt(long, default_value = "2097152", parse(try_from_str = parse_u32))]
    chip_size: u32,

    #[structopt(short = "n", long, default_value = "1")]
    chips: usize,

    #[structopt(long, default_value = "256", parse(try_from_str = parse_u32))]
    page_size: u32,

    #[structopt(long, default_value = "4096", parse(try_from_str = parse_u32))]
    sector_size: u32,

    #[structopt(long, default_value = "9")]
    block_bits: u32,

    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Print the array layout.
    Info,
    /// Print `len` bytes starting at `addr`.
    Read {
        #[structopt(parse(try_from_str = parse_u32))]
        addr: u32,
        #[structopt(parse(try_from_str = parse_u32))]
        len: u32,
    },
    /// Write a string at `addr`.
    Write {
        #[structopt(parse(try_from_str = parse_u32))]
        addr: u32,
        data: String,
    },
    /// Hex dump a slice. Negative indices count from the end.
    Dump {
        #[structopt(allow_hyphen_values = true)]
        start: Option<i64>,
        #[structopt(allow_hyphen_values = true)]
        stop: Option<i64>,
    },
    /// Write one byte value over the whole array.
    Fill {
        #[structopt(parse(try_from_str = parse_u32))]
        value: u32,
    },
    /// Erase the whole array.
    Erase,
    /// Destructive self test of addressing and boundary handling.
    Test,
}

enum Device {
    Direct(AddressSpace<RamChip>),
    Cached(SectorCache<RamChip>),
}

impl Device {
    fn storage(&mut self) -> &mut dyn Storage {
        match self {
            Device::Direct(space) => space as &mut dyn Storage,
            Device::Cached(cache) => cache,
        }
    }

    fn geometry(&self) -> Geometry {
        match self {
            Device::Direct(space) => space.geometry(),
            Device::Cached(cache) => cache.space().geometry(),
        }
    }

    fn erase(&mut self) -> Result<(), ErrorKind> {
        match self {
            Device::Direct(space) => space.erase(ERASED_VALUE),
            Device::Cached(cache) => cache.erase(),
        }
    }

    fn into_chips(self) -> Result<Vec<RamChip>, ErrorKind> {
        match self {
            Device::Direct(space) => Ok(space.into_chips()),
            Device::Cached(cache) => Ok(cache.into_inner()?.into_chips()),
        }
    }
}

fn nvarray_error_to_io(err: ErrorKind) -> io::Error {
    let kind = match err {
        ErrorKind::AddressOutOfRange | ErrorKind::LengthMismatch => io::ErrorKind::InvalidInput,
        ErrorKind::NotSupported => io::ErrorKind::Unsupported,
        ErrorKind::DeviceTimeout => io::ErrorKind::TimedOut,
        ErrorKind::ChipNotFound => io::ErrorKind::NotFound,
        ErrorKind::HardwareMismatch => io::ErrorKind::InvalidData,
        ErrorKind::Bus => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

fn geometry(opt: &Opt) -> Geometry {
    match opt.kind {
        ChipKind::Flash => Geometry::flash(opt.chip_size, opt.page_size, opt.sector_size),
        ChipKind::Eeprom => Geometry::eeprom(opt.chip_size, opt.page_size),
        ChipKind::Ram => Geometry::ram(opt.chip_size),
    }
}

/// Bytes held by `chips` chips of `chip_size` bytes each.
fn image_len(chips: usize, chip_size: u32) -> Result<usize, ErrorKind> {
    chips.checked_mul(chip_size as usize).ok_or_else(|| {
        error!("Array of {} chips exceeds the address range.", chips);
        ErrorKind::HardwareMismatch
    })
}

fn open(opt: &Opt) -> io::Result<Device> {
    let geometry = geometry(opt);
    if opt.chip_size == 0 {
        return Err(nvarray_error_to_io(ErrorKind::HardwareMismatch));
    }
    let mut image = match fs::read(&opt.image) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating blank image {}", opt.image.display());
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    let total = image_len(opt.chips, opt.chip_size).map_err(nvarray_error_to_io)?;
    if image.len() > total {
        warn!(
            "Image is {} bytes, array holds {}. Extra bytes dropped.",
            image.len(),
            total
        );
    }
    image.resize(total, geometry.erased_value);

    let chips: Vec<RamChip> = image
        .chunks(opt.chip_size as usize)
        .map(|chunk| RamChip::from_bytes(geometry, chunk.to_vec()))
        .collect();
    let space = AddressSpace::new(opt.block_bits, chips).map_err(nvarray_error_to_io)?;
    if geometry.has_sectors() {
        let cache = SectorCache::new(space).map_err(nvarray_error_to_io)?;
        Ok(Device::Cached(cache))
    } else {
        Ok(Device::Direct(space))
    }
}

fn save(path: &Path, device: Device) -> io::Result<()> {
    let chips = device.into_chips().map_err(nvarray_error_to_io)?;
    let mut image = Vec::new();
    for chip in chips {
        image.extend_from_slice(&chip.into_bytes());
    }
    debug!("Writing {} bytes to {}", image.len(), path.display());
    fs::write(path, image)
}

fn hexdump(base: u32, data: &[u8]) {
    for (n, line) in data.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let text: String = line
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect();
        println!(
            "{:08x}  {:<47}  {}",
            base as usize + n * 16,
            hex.join(" "),
            text
        );
    }
}

fn info(device: &mut Device) -> Result<(), ErrorKind> {
    let geometry = device.geometry();
    let storage = device.storage();
    println!("size:          {} bytes", storage.len());
    println!("chip size:     {} bytes", geometry.chip_size);
    println!("page size:     {} bytes", geometry.page_size);
    if geometry.has_sectors() {
        println!("sector size:   {} bytes", geometry.sector_size);
    }
    println!("erased value:  0x{:02x}", geometry.erased_value);
    let blocks = storage.control(ControlOp::SectorCount, 0)?.unwrap_or(0);
    let block_size = storage.control(ControlOp::SectorSize, 0)?.unwrap_or(0);
    println!("blocks:        {} x {} bytes", blocks, block_size);
    Ok(())
}

fn fill(storage: &mut dyn Storage, value: u8) -> Result<(), ErrorKind> {
    let block = vec![value; 4096];
    let len = storage.len();
    let mut addr = 0;
    while addr < len {
        let n = std::cmp::min(block.len() as u32, len - addr);
        storage.write(addr, &block[..n as usize])?;
        addr += n;
    }
    storage.sync()
}

fn check(ok: bool, what: &str) -> io::Result<()> {
    if ok {
        println!("{}: ok", what);
        Ok(())
    } else {
        error!("{}: FAIL", what);
        Err(io::Error::new(io::ErrorKind::Other, format!("{} failed", what)))
    }
}

fn boundary_test(storage: &mut dyn Storage, bs: u32) -> Result<bool, ErrorKind> {
    let d0 = b"this >";
    let d1 = b"<is the boundary";
    let d2 = b"this ><is the boundary";
    let garbage = b"xxxxxxxxxxxxxxxxxxx";
    let start = i64::from(bs) - d0.len() as i64;

    storage.write_range(Slice::new(start, start + garbage.len() as i64), garbage)?;
    storage.write_range(Slice::new(start, start + d0.len() as i64), d0)?;
    let res = storage.read_range(Slice::new(start, start + garbage.len() as i64))?;
    if &res[..] != b"this >xxxxxxxxxxxxx" {
        return Ok(false);
    }
    storage.write_range(Slice::new(i64::from(bs), i64::from(bs) + d1.len() as i64), d1)?;
    storage.sync()?;
    let res = storage.read_range(Slice::new(start, start + d2.len() as i64))?;
    Ok(&res[..] == d2)
}

fn self_test(device: &mut Device) -> io::Result<()> {
    let geometry = device.geometry();
    let storage = device.storage();
    let len = storage.len();
    let num_chips = len / geometry.chip_size;
    let e = nvarray_error_to_io;

    let mut ok = true;
    for n in 0..num_chips {
        let addr = n * geometry.chip_size + geometry.chip_size / 2;
        let value = (n as u8).wrapping_add(0x5a);
        storage.write_byte(addr, value).map_err(e)?;
        ok &= storage.read_byte(addr).map_err(e)? == value;
    }
    check(ok, "byte addressing")?;

    let data: Vec<u8> = (0..=255u8).collect();
    storage
        .write_range(Slice::from(-256i64..), &data)
        .map_err(e)?;
    let back = storage.read_range(Slice::new(-256, -1)).map_err(e)?;
    check(back[..] == data[..255], "slice readback")?;

    if geometry.has_sectors() {
        let bs = geometry.sector_size;
        check(boundary_test(storage, bs).map_err(e)?, "sector boundary")?;
    }
    for n in 1..num_chips {
        let bs = n * geometry.chip_size;
        check(
            boundary_test(storage, bs).map_err(e)?,
            &format!("chip boundary {}", n),
        )?;
    }

    let err = storage.read_byte(len);
    check(err == Err(ErrorKind::AddressOutOfRange), "out of range")?;
    storage.sync().map_err(e)
}

fn run(opt: Opt) -> io::Result<()> {
    let mut device = open(&opt)?;
    let e = nvarray_error_to_io;
    match opt.cmd {
        Command::Info => info(&mut device).map_err(e)?,
        Command::Read { addr, len } => {
            let stop = i64::from(addr) + i64::from(len);
            let data = device
                .storage()
                .read_range(Slice::new(i64::from(addr), stop))
                .map_err(e)?;
            hexdump(addr, &data);
        }
        Command::Write { addr, ref data } => {
            let storage = device.storage();
            storage.write(addr, data.as_bytes()).map_err(e)?;
            storage.sync().map_err(e)?;
        }
        Command::Dump { start, stop } => {
            let storage = device.storage();
            let slice = Slice {
                start,
                stop,
                step: None,
            };
            let base = slice.resolve(storage.len()).map_err(e)?.start;
            let data = storage.read_range(slice).map_err(e)?;
            hexdump(base, &data);
        }
        Command::Fill { value } => {
            let value = u8::try_from(value)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "fill value > 0xff"))?;
            fill(device.storage(), value).map_err(e)?;
        }
        Command::Erase => device.erase().map_err(e)?,
        Command::Test => {
            warn!("Self test overwrites parts of {}", opt.image.display());
            self_test(&mut device)?;
        }
    }
    device.storage().control(ControlOp::Deinit, 0).map_err(e)?;
    save(&opt.image, device)
}

fn main() {
    let opt = Opt::from_args();

    env_logger::builder()
        .format_timestamp_nanos()
        .filter_level(opt.log_level)
        .init();

    if let Err(err) = run(opt) {
        error!("{}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_len() {
        assert_eq!(image_len(4, 8192), Ok(32768));
        assert_eq!(image_len(0, 8192), Ok(0));
        assert_eq!(
            image_len(usize::MAX, 2097152),
            Err(ErrorKind::HardwareMismatch)
        );
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("4096"), Ok(4096));
        assert_eq!(parse_u32("0x1000"), Ok(4096));
        assert!(parse_u32("0xzz").is_err());
    }
}
