//! Read-only descriptors of the supported NOR flash parts.
//!
//! Each entry records the erase/program geometry and the instruction set the
//! worker emits. All listed parts take 3-byte addresses, which caps the usable
//! density at 16 MiB.

/// Per-chip parameters consumed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashType {
    /// Part name, for diagnostics.
    pub name: &'static str,
    /// Total density in bytes.
    pub total_size: u32,
    /// Smallest erasable unit in bytes.
    pub sector_size: u32,
    /// Smallest programmable unit in bytes.
    pub page_size: u32,
    /// Pages per sector.
    pub pages_per_sector: u32,
    /// Read data opcode.
    pub read_data: u8,
    /// Read status register opcode.
    pub read_status: u8,
    /// Write enable opcode.
    pub write_enable: u8,
    /// Page program opcode.
    pub write_page: u8,
    /// Sector erase opcode.
    pub erase_sector: u8,
    /// Write-in-progress bit within the status register.
    pub wip_mask: u8,
}

/// Winbond W25Q32JV, 4 MiB.
pub const W25Q32JV: FlashType = FlashType {
    name: "W25Q32JV",
    total_size: 4 * 1024 * 1024,
    sector_size: 4096,
    page_size: 256,
    pages_per_sector: 16,
    read_data: 0x03,
    read_status: 0x05,
    write_enable: 0x06,
    write_page: 0x02,
    erase_sector: 0x20,
    wip_mask: 0x01,
};

/// Winbond W25Q128JV, 16 MiB.
pub const W25Q128JV: FlashType = FlashType {
    name: "W25Q128JV",
    total_size: 16 * 1024 * 1024,
    sector_size: 4096,
    page_size: 256,
    pages_per_sector: 16,
    read_data: 0x03,
    read_status: 0x05,
    write_enable: 0x06,
    write_page: 0x02,
    erase_sector: 0x20,
    wip_mask: 0x01,
};

/// Macronix MX25L3233F, 4 MiB.
pub const MX25L3233F: FlashType = FlashType {
    name: "MX25L3233F",
    total_size: 4 * 1024 * 1024,
    sector_size: 4096,
    page_size: 256,
    pages_per_sector: 16,
    read_data: 0x03,
    read_status: 0x05,
    write_enable: 0x06,
    write_page: 0x02,
    erase_sector: 0x20,
    wip_mask: 0x01,
};

/// Descriptor table, indexed by the `flash_type` argument of
/// [`FlashRing::new`](crate::FlashRing::new).
pub const FLASH_TYPES: &[FlashType] = &[W25Q32JV, W25Q128JV, MX25L3233F];
