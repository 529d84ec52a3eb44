use std::fmt;

use serde::{Deserialize, Serialize};

/// SAMS / AMS memory card.
pub const SAMS_CRU_BASE: u16 = 0x1E00;
/// P-Code card.
pub const PCODE_CRU_BASE: u16 = 0x1F00;
/// TI-99/8 internal DSR page (Mofetta).
pub const INTDSR_CRU_BASE: u16 = 0x1700;
/// TI-99/8 Hexbus DSR page (Mofetta).
pub const HEXBUS_CRU_BASE: u16 = 0x2700;

/// Address on the CRU bus, in the form the CPU puts it into R12.
///
/// The CPU addresses single bits; the software address is twice the bit
/// number. Multi-bit reads fetch groups of 8 bits, so the byte offset of a
/// group is the software address divided by 16.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CruAddress(u16);

impl CruAddress {
    pub const fn new(address: u16) -> Self {
        Self(address)
    }

    /// Address of bit number `bit`.
    pub const fn from_bit(bit: u16) -> Self {
        Self(bit << 1)
    }

    /// First bit of the 8-bit group `offset`.
    pub const fn from_byte_offset(offset: u16) -> Self {
        Self(offset << 4)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    pub const fn bit_index(self) -> u16 {
        self.0 >> 1
    }

    pub const fn to_byte_offset(self) -> u16 {
        self.0 >> 4
    }

    /// Card or device page (R12 base with the bit part masked off).
    pub const fn page(self) -> u16 {
        self.0 & 0xFF00
    }

    /// Bit number relative to the page (0..=127).
    pub const fn bit_in_page(self) -> u16 {
        (self.0 & 0x00FE) >> 1
    }

    pub const fn in_page(self, base: u16) -> bool {
        self.page() == base
    }
}

impl From<u16> for CruAddress {
    fn from(address: u16) -> Self {
        Self(address)
    }
}

impl fmt::Display for CruAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CRU {:#06X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let address = CruAddress::new(0x1E02);
        assert_eq!(address.bit_index(), 0x0F01);
        assert_eq!(address.page(), SAMS_CRU_BASE);
        assert_eq!(address.bit_in_page(), 1);
        assert!(address.in_page(SAMS_CRU_BASE));

        assert_eq!(CruAddress::from_bit(0x0F01), address);
        assert_eq!(CruAddress::from_byte_offset(0x01E0).value(), 0x1E00);
        assert_eq!(CruAddress::new(0x1F80).to_byte_offset(), 0x01F8);
        assert_eq!(CruAddress::new(0x1F80).bit_in_page(), 0x40);
    }
}
