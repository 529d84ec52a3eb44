use serde::{Deserialize, Serialize};

use crate::{
    cru::{CruAddress, HEXBUS_CRU_BASE, INTDSR_CRU_BASE},
    signal::LineState,
};

/// Rising CLKOUT edges per GROMCLK level change.
pub const GROMCLK_DIVIDER: u8 = 2;

/// Physical address prefix of the Pascal ROM.
pub const PASCAL_PREFIX: u8 = 0xF0;

/// Physical address prefix of the system area (ROM1, DSRs, cartridge).
pub const SYSTEM_PREFIX: u8 = 0xFF;

/// Physical address decoder and GROM clock divider of the TI-99/8.
///
/// The 24-bit physical address arrives in two words: MSAST marks the start
/// of an address, the first word carries the prefix (bits 23..16), the
/// second one the low 16 bits. In logical cycles Mofetta only decodes the
/// Oso select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mofetta {
    pmemen: bool,
    lasreq: bool,
    skdrcs: bool,
    gromclk_up: bool,
    gotfirstword: bool,
    address_latch: u16,
    prefix: u8,
    alcpg: bool,
    txspg: bool,
    rom1cs: bool,
    rom1am: bool,
    rom1al: bool,
    alccs: bool,
    prcs: bool,
    cmas: bool,
    gromclock_count: u8,
    msast: LineState,
}

impl Default for Mofetta {
    fn default() -> Self {
        Self::new()
    }
}

impl Mofetta {
    pub fn new() -> Self {
        Self {
            pmemen: false,
            lasreq: false,
            skdrcs: false,
            gromclk_up: false,
            gotfirstword: false,
            address_latch: 0,
            prefix: 0,
            alcpg: false,
            txspg: false,
            rom1cs: false,
            rom1am: false,
            rom1al: false,
            alccs: false,
            prcs: false,
            cmas: false,
            gromclock_count: 0,
            msast: LineState::Clear,
        }
    }

    pub fn set_address(&mut self, offset: u16, _dbin: LineState) {
        if self.lasreq {
            self.clear_selects();
            self.alccs = offset & 0xFFF0 == 0xF880;
            return;
        }

        if !self.gotfirstword {
            self.prefix = (offset & 0xFF) as u8;
            self.gotfirstword = true;
            return;
        }

        self.address_latch = offset;
        self.gotfirstword = false;
        self.decode();
    }

    /// Start of a physical address transfer.
    pub fn msast_in(&mut self, state: LineState) {
        if state.is_asserted() && self.msast.is_clear() {
            self.gotfirstword = false;
        }
        self.msast = state;
    }

    pub fn lascs_in(&mut self, state: LineState) {
        self.lasreq = state.is_asserted();
    }

    pub fn pmemen_in(&mut self, state: LineState) {
        self.pmemen = state.is_asserted();
    }

    /// DRAM select from Amigo.
    pub fn skdrcs_in(&mut self, state: LineState) {
        self.skdrcs = state.is_asserted();
    }

    /// CRU bits at 0x1700 and 0x2700 select the internal and the Hexbus DSR.
    pub fn cruwrite(&mut self, offset: CruAddress, data: u8) {
        if offset.bit_in_page() != 0 {
            return;
        }
        let enabled = data & 1 != 0;
        match offset.page() {
            INTDSR_CRU_BASE => {
                tracing::debug!("[MOFETTA] Internal DSR {}", if enabled { "on" } else { "off" });
                self.alcpg = enabled;
            }
            HEXBUS_CRU_BASE => {
                tracing::debug!("[MOFETTA] Hexbus DSR {}", if enabled { "on" } else { "off" });
                self.txspg = enabled;
            }
            _ => {}
        }
    }

    /// Divides CLKOUT by four. Returns the new GROMCLK level when it changes.
    pub fn clock_in(&mut self, state: LineState) -> Option<LineState> {
        if state.is_clear() {
            return None;
        }
        self.gromclock_count += 1;
        if self.gromclock_count < GROMCLK_DIVIDER {
            return None;
        }
        self.gromclock_count = 0;
        self.gromclk_up = !self.gromclk_up;
        Some(self.gromclk_out())
    }

    pub fn gromclk_out(&self) -> LineState {
        self.gromclk_up.into()
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn rom1cs_out(&self) -> bool {
        self.rom1cs
    }

    pub fn rom1am_out(&self) -> bool {
        self.rom1am
    }

    pub fn rom1al_out(&self) -> bool {
        self.rom1al
    }

    /// Offset into ROM1; AM and AL select one of four 8 KiB banks.
    pub fn rom1_offset(&self) -> usize {
        ((self.rom1am as usize) << 14)
            | ((self.rom1al as usize) << 13)
            | (self.address_latch & 0x1FFF) as usize
    }

    pub fn alccs_out(&self) -> bool {
        self.alccs
    }

    pub fn prcs_out(&self) -> bool {
        self.prcs
    }

    pub fn cmas_out(&self) -> bool {
        self.cmas
    }

    /// Data bus connect towards the box: a physical access nobody inside
    /// the console claims.
    pub fn dbc_out(&self) -> bool {
        !self.lasreq && !self.skdrcs && !self.rom1cs && !self.prcs && !self.cmas
    }

    pub fn intdsr_enabled(&self) -> bool {
        self.alcpg
    }

    pub fn hexbus_dsr_enabled(&self) -> bool {
        self.txspg
    }

    pub fn reset(&mut self) {
        self.gotfirstword = false;
        self.alcpg = false;
        self.txspg = false;
        self.gromclock_count = 0;
        self.gromclk_up = false;
        self.msast = LineState::Clear;
        self.clear_selects();
    }

    fn decode(&mut self) {
        self.clear_selects();
        if self.skdrcs {
            return;
        }

        let address = self.address_latch;
        match self.prefix {
            PASCAL_PREFIX => self.prcs = true,
            SYSTEM_PREFIX => match address {
                0x0000..=0x3FFF => {
                    self.rom1cs = true;
                    self.rom1al = address & 0x2000 != 0;
                }
                0x4000..=0x5FFF => {
                    if self.alcpg {
                        self.rom1cs = true;
                        self.rom1am = true;
                    } else if self.txspg {
                        self.rom1cs = true;
                        self.rom1am = true;
                        self.rom1al = true;
                    }
                }
                0x6000..=0x9FFF => self.cmas = true,
                _ => {}
            },
            _ => {}
        }

        tracing::trace!(
            "[MOFETTA] {:02X}{:04X} rom1={} pascal={} cartridge={}",
            self.prefix,
            address,
            self.rom1cs,
            self.prcs,
            self.cmas
        );
    }

    fn clear_selects(&mut self) {
        self.rom1cs = false;
        self.rom1am = false;
        self.rom1al = false;
        self.alccs = false;
        self.prcs = false;
        self.cmas = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn physical(mofetta: &mut Mofetta, address: u32) {
        mofetta.msast_in(LineState::Assert);
        mofetta.set_address((address >> 16) as u16, LineState::Assert);
        mofetta.msast_in(LineState::Clear);
        mofetta.set_address(address as u16, LineState::Assert);
    }

    #[test]
    fn test_rom1_banks() {
        let mut mofetta = Mofetta::new();
        physical(&mut mofetta, 0xFF2010);
        assert!(mofetta.rom1cs_out());
        assert_eq!(mofetta.rom1_offset(), 0x2010);

        physical(&mut mofetta, 0xFF4000);
        assert!(!mofetta.rom1cs_out());
        assert!(mofetta.dbc_out());

        mofetta.cruwrite(CruAddress::new(0x1700), 1);
        physical(&mut mofetta, 0xFF4002);
        assert_eq!(mofetta.rom1_offset(), 0x4002);

        mofetta.cruwrite(CruAddress::new(0x1700), 0);
        mofetta.cruwrite(CruAddress::new(0x2700), 1);
        physical(&mut mofetta, 0xFF5000);
        assert_eq!(mofetta.rom1_offset(), 0x7000);
    }

    #[test]
    fn test_other_selects() {
        let mut mofetta = Mofetta::new();
        physical(&mut mofetta, 0xF01234);
        assert!(mofetta.prcs_out());
        physical(&mut mofetta, 0xFF6000);
        assert!(mofetta.cmas_out());
        physical(&mut mofetta, 0xFFA000);
        assert!(mofetta.dbc_out());

        mofetta.lascs_in(LineState::Assert);
        mofetta.set_address(0xF882, LineState::Assert);
        assert!(mofetta.alccs_out());
        assert!(!mofetta.dbc_out());
    }

    #[test]
    fn test_gromclk_divider() {
        let mut mofetta = Mofetta::new();
        let mut changes = Vec::new();
        for _ in 0..8 {
            if let Some(level) = mofetta.clock_in(LineState::Assert) {
                changes.push(level);
            }
            assert_eq!(mofetta.clock_in(LineState::Clear), None);
        }
        assert_eq!(
            changes,
            vec![
                LineState::Assert,
                LineState::Clear,
                LineState::Assert,
                LineState::Clear
            ]
        );
    }
}
