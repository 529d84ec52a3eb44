use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, state::Relink};

/// Largest RAM pool reachable with 8-bit page registers and 4 KiB pages.
pub const AMS_MAX_SIZE: usize = 0x10_0000;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: u16 = 0x0FFF;

/// Logical pages backed by RAM on the TI-99/4A: 0x2000-0x3FFF and
/// 0xA000-0xFFFF.
pub const CONSOLE_RAM_PAGES: u16 = 0b1111_1100_0000_1100;

/// Paged memory mapper in the AMS / SAMS style.
///
/// Sixteen registers map the logical page (bits 15..12) to a physical page.
/// In transparent mode the logical address is used as is. The register
/// bank itself is only visible while `access_mapper` is set.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug, PartialEq)]
pub struct AmsMapper {
    registers: [u8; 16],
    map_mode: bool,
    access_mapper: bool,
    ram_pages: u16,
    #[derivative(Debug = "ignore")]
    ram: Vec<u8>,
}

impl Default for AmsMapper {
    fn default() -> Self {
        Self {
            registers: [0; 16],
            map_mode: false,
            access_mapper: false,
            ram_pages: CONSOLE_RAM_PAGES,
            ram: vec![0; AMS_MAX_SIZE],
        }
    }
}

impl AmsMapper {
    /// Creates a mapper with `size` bytes of RAM. The size must be a power of
    /// two between 64 KiB and 1 MiB.
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if !size.is_power_of_two() || !(0x10000..=AMS_MAX_SIZE).contains(&size) {
            return Err(ConfigError::InvalidRamSize(size));
        }

        Ok(Self {
            ram: vec![0; size],
            ..Default::default()
        })
    }

    /// Restricts the logical pages that may be written; one bit per page.
    pub fn with_ram_pages(mut self, pages: u16) -> Self {
        self.ram_pages = pages;
        self
    }

    pub fn map_mode(&self) -> bool {
        self.map_mode
    }

    pub fn access_mapper(&self) -> bool {
        self.access_mapper
    }

    pub fn set_map_mode(&mut self, enabled: bool) {
        tracing::debug!("[AMS] Map mode {}", if enabled { "on" } else { "off" });
        self.map_mode = enabled;
    }

    pub fn set_access_mapper(&mut self, enabled: bool) {
        tracing::debug!(
            "[AMS] Mapper registers {}",
            if enabled { "visible" } else { "hidden" }
        );
        self.access_mapper = enabled;
    }

    pub fn registers(&self) -> &[u8; 16] {
        &self.registers
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    pub fn is_ram(&self, logical: u16) -> bool {
        self.ram_pages & (1 << (logical >> PAGE_SHIFT)) != 0
    }

    /// Translates a logical address. Physical addresses beyond the installed
    /// RAM wrap around, like the missing address lines on a smaller card.
    pub fn physical_address(&self, logical: u16) -> u32 {
        let physical = if self.map_mode {
            let page = self.registers[(logical >> PAGE_SHIFT) as usize] as u32;
            (page << PAGE_SHIFT) | (logical & PAGE_MASK) as u32
        } else {
            logical as u32
        };
        physical & (self.ram.len() as u32 - 1)
    }

    pub fn read(&self, logical: u16) -> u8 {
        let physical = self.physical_address(logical);
        self.ram[physical as usize]
    }

    pub fn write(&mut self, logical: u16, value: u8) {
        if !self.is_ram(logical) {
            tracing::trace!("[AMS] Ignoring write to ROM page at {:04X}", logical);
            return;
        }
        let physical = self.physical_address(logical);
        tracing::trace!("[AMS] {:04X} -> {:05X} = {:02X}", logical, physical, value);
        self.ram[physical as usize] = value;
    }

    /// Reads a register; `None` unless the register bank is visible.
    pub fn register_read(&self, index: usize) -> Option<u8> {
        if !self.access_mapper {
            return None;
        }
        Some(self.registers[index & 0x0F])
    }

    /// Writes a register; returns whether the write reached the bank.
    pub fn register_write(&mut self, index: usize, value: u8) -> bool {
        if !self.access_mapper {
            return false;
        }
        tracing::debug!("[AMS] Register {:X} = {:02X}", index & 0x0F, value);
        self.registers[index & 0x0F] = value;
        true
    }

    /// Direct access to the physical pool, bypassing translation.
    pub fn physical_read(&self, physical: u32) -> u8 {
        self.ram[(physical as usize) & (self.ram.len() - 1)]
    }

    pub fn reset(&mut self) {
        self.registers = [0; 16];
        self.map_mode = false;
        self.access_mapper = false;
    }
}

impl Relink for AmsMapper {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_mapping() {
        let mut mapper = AmsMapper::default().with_ram_pages(0xFFFF);
        for logical in (0..=0xFFFFu16).step_by(0x0111) {
            mapper.write(logical, (logical >> 4) as u8);
            assert_eq!(mapper.physical_address(logical), logical as u32);
            assert_eq!(mapper.physical_read(logical as u32), (logical >> 4) as u8);
        }
    }

    #[test]
    fn test_page_translation() {
        let mut mapper = AmsMapper::default();
        mapper.set_access_mapper(true);
        for page in 0..16 {
            assert!(mapper.register_write(page, 0x10 + page as u8 * 3));
        }
        mapper.set_map_mode(true);

        for page in 0..16u16 {
            for low in [0x000, 0x123, 0xFFF] {
                let logical = (page << 12) | low;
                let expected = ((0x10 + page as u32 * 3) << 12) | low as u32;
                assert_eq!(mapper.physical_address(logical), expected);
            }
        }
    }

    #[test]
    fn test_registers_hidden_without_access() {
        let mut mapper = AmsMapper::default();
        assert!(!mapper.register_write(3, 0x42));
        assert_eq!(mapper.register_read(3), None);

        mapper.set_access_mapper(true);
        mapper.register_write(3, 0x42);
        mapper.set_access_mapper(false);
        mapper.set_map_mode(true);
        mapper.set_map_mode(false);
        mapper.set_access_mapper(true);
        assert_eq!(mapper.register_read(3), Some(0x42));
    }

    #[test]
    fn test_rom_pages_ignore_writes() {
        let mut mapper = AmsMapper::default();
        mapper.write(0x0010, 0x99);
        mapper.write(0x6000, 0x99);
        assert_eq!(mapper.read(0x0010), 0);
        assert_eq!(mapper.read(0x6000), 0);
        mapper.write(0x2000, 0x99);
        assert_eq!(mapper.read(0x2000), 0x99);
    }

    #[test]
    fn test_small_card_wraps() {
        let mut mapper = AmsMapper::new(0x40000).expect("valid size");
        mapper.set_access_mapper(true);
        mapper.register_write(0xA, 0x45);
        mapper.set_map_mode(true);
        assert_eq!(mapper.physical_address(0xA001), 0x05001);

        assert!(AmsMapper::new(0x30000).is_err());
    }
}
