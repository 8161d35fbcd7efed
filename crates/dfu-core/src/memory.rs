//! Memory map of extended addressing (DfuSe) devices.
//!
//! DfuSe devices describe their memory in the interface name string, e.g.
//! `@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg`.

use std::fmt;

use nonempty::NonEmpty;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    pub name: String,
    pub segments: NonEmpty<MemorySegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySegment {
    start: u32,
    /// Exclusive; may be one past the last 32-bit address.
    end: u64,
    page_size: u32,
    mem_type: u8,
}

impl MemorySegment {
    pub fn start(&self) -> u32 {
        self.start
    }
    pub fn end(&self) -> u64 {
        self.end
    }
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
    pub fn size(&self) -> u64 {
        self.end - u64::from(self.start)
    }
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && u64::from(addr) < self.end
    }
    pub fn readable(&self) -> bool {
        self.mem_type & 1 == 1
    }
    pub fn erasable(&self) -> bool {
        self.mem_type & 2 == 2
    }
    pub fn writable(&self) -> bool {
        self.mem_type & 4 == 4
    }

    /// Comma separated permissions, `inaccessible` when there are none.
    pub fn permissions(&self) -> String {
        let mut properties = Vec::new();
        if self.readable() {
            properties.push("readable");
        }
        if self.erasable() {
            properties.push("erasable");
        }
        if self.writable() {
            properties.push("writable");
        }
        if properties.is_empty() {
            "inaccessible".into()
        } else {
            properties.join(", ")
        }
    }
}

impl MemoryMap {
    /// Segment containing `addr`, if any.
    pub fn segment(&self, addr: u32) -> Option<&MemorySegment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    pub fn first_writable_segment(&self) -> Option<&MemorySegment> {
        self.segments.iter().find(|s| s.writable())
    }

    /// Default download address: the start of the first writable segment.
    pub fn default_start_address(&self) -> Option<u32> {
        self.first_writable_segment().map(|s| s.start())
    }

    /// Number of bytes readable from `start_addr` across contiguous
    /// readable segments.
    pub fn max_read_size(&self, start_addr: u32) -> u64 {
        let mut size = 0;
        let mut addr = u64::from(start_addr);
        for segment in self.segments.iter() {
            if addr >= u64::from(segment.start()) && addr < segment.end() {
                if !segment.readable() {
                    break;
                }
                size += segment.end() - addr;
                addr = segment.end();
            }
        }
        size
    }

    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(MemorySegment::size).sum()
    }
}

impl fmt::Display for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Selected memory region: {} ({})",
            self.name,
            nice_size(self.total_size())
        )?;
        for segment in self.segments.iter() {
            write!(
                f,
                "\n0x{:08x}-0x{:08x} ({})",
                segment.start(),
                segment.end() - 1,
                segment.permissions()
            )?;
        }
        Ok(())
    }
}

/// Format a byte count with binary units.
pub fn nice_size(n: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    let (value, unit) = if n >= GIB {
        (n as f64 / GIB as f64, "GiB")
    } else if n >= MIB {
        (n as f64 / MIB as f64, "MiB")
    } else if n >= KIB {
        (n as f64 / KIB as f64, "KiB")
    } else {
        return format!("{n}B");
    };
    format!("{value}{unit}")
}

/// One past the highest 32-bit address.
const ADDRESS_SPACE_END: u64 = 1 << 32;

/// Parse a DfuSe memory layout string. Returns `None` if no segment matches.
pub fn parse_memory_layout(mem_layout_str: &str) -> Option<MemoryMap> {
    let r = Regex::new(r"@?([^/]*?)\s*/0x([\da-fA-F]+)U?/(.*)").ok()?;
    let captures = r.captures(mem_layout_str)?;

    let name = String::from(&captures[1]);
    let start_addr = u32::from_str_radix(&captures[2], 16).ok()?;

    let segments = &captures[3];
    let sr = Regex::new(r"(\d+)\*(\d+)([KMB ]?)([a-g])(?:,|$)").ok()?;

    let mut layout = Vec::new();
    let mut current_addr = u64::from(start_addr);

    for seg_match in sr.captures_iter(segments) {
        let pages: u32 = seg_match[1].parse().unwrap_or(0);
        let mut page_size: u32 = seg_match[2].parse().unwrap_or(0);

        match &seg_match[3] {
            "K" => page_size = page_size.checked_mul(1024)?,
            "M" => page_size = page_size.checked_mul(1024 * 1024)?,
            _ => {}
        }

        let mem_type = (seg_match[4].as_bytes()[0]) & 7;
        let end_addr = current_addr + u64::from(pages) * u64::from(page_size);
        if end_addr > ADDRESS_SPACE_END {
            return None;
        }

        layout.push(MemorySegment {
            start: u32::try_from(current_addr).ok()?,
            end: end_addr,
            page_size,
            mem_type,
        });
        current_addr = end_addr;
    }

    NonEmpty::from_vec(layout).map(|segments| MemoryMap { name, segments })
}
