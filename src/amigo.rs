use serde::{Deserialize, Serialize};

use crate::signal::LineState;

/// Base register flag: the page is write protected.
pub const PROTECT_FLAG: u32 = 0x4000_0000;

/// Physical addresses below this one select the DRAM.
pub const DRAM_LIMIT: u32 = 0xF0_0000;

/// Bytes of SRAM holding one saved map (16 registers of 4 bytes).
pub const MAP_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapTransfer {
    /// SRAM to base registers
    Load,
    /// Base registers to SRAM
    Save,
}

/// DMA transfer of a map between the base registers and the SRAM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MapperDma {
    direction: MapTransfer,
    sram_address: usize,
    register: usize,
    byte: u8,
    value: u32,
}

/// Logical to physical address mapper of the TI-99/8.
///
/// Each logical 4 KiB page has a 32-bit base register; the low 24 bits hold
/// the physical base, the top byte holds flags. Maps are loaded from and
/// saved to the SRAM by DMA while the CPU is on HOLD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amigo {
    base_register: [u32; 16],
    logical_space: bool,
    physical_address: u32,
    srdy: LineState,
    crus: bool,
    memen: bool,
    protflag: u8,
    sram_accessed: bool,
    dram_accessed: bool,
    mapper_accessed: bool,
    hold_acknowledged: bool,
    dma: Option<MapperDma>,
}

impl Default for Amigo {
    fn default() -> Self {
        Self::new()
    }
}

impl Amigo {
    pub fn new() -> Self {
        Self {
            base_register: [0; 16],
            logical_space: false,
            physical_address: 0,
            srdy: LineState::Assert,
            crus: true,
            memen: false,
            protflag: 0,
            sram_accessed: false,
            dram_accessed: false,
            mapper_accessed: false,
            hold_acknowledged: false,
            dma: None,
        }
    }

    pub fn crus_in(&mut self, state: LineState) {
        self.crus = state.is_asserted();
    }

    pub fn lascs_in(&mut self, state: LineState) {
        self.logical_space = state.is_asserted();
    }

    pub fn memen_in(&mut self, state: LineState) {
        self.memen = state.is_asserted();
    }

    /// System READY, before the DMA gate.
    pub fn srdy_in(&mut self, state: LineState) {
        self.srdy = state;
    }

    pub fn holda_in(&mut self, state: LineState) {
        if state.is_asserted() && !self.hold_acknowledged && self.dma.is_some() {
            tracing::debug!("[AMIGO] HOLD acknowledged");
        }
        self.hold_acknowledged = state.is_asserted();
    }

    pub fn set_address(&mut self, offset: u16) {
        self.sram_accessed = false;
        self.dram_accessed = false;
        self.mapper_accessed = false;

        if self.logical_space {
            if self.crus {
                self.sram_accessed = offset & 0xFC00 == 0x8000;
                self.mapper_accessed = offset & 0xFFF0 == 0x8810;
            } else {
                self.sram_accessed = offset & 0xF800 == 0xF000;
                self.mapper_accessed = offset & 0xFFF0 == 0xF810;
            }
            return;
        }

        self.physical_address = self.translate(offset);
        self.dram_accessed = self.physical_address < DRAM_LIMIT;
        tracing::trace!("[AMIGO] {:04X} -> {:06X}", offset, self.physical_address);
    }

    /// Physical address of a logical one under the current map.
    pub fn translate(&self, offset: u16) -> u32 {
        let base = self.base_register[(offset >> 12) as usize] & 0x00FF_FFFF;
        (base + (offset & 0x0FFF) as u32) & 0x00FF_FFFF
    }

    pub fn physical_address(&self) -> u32 {
        self.physical_address
    }

    /// Checks a write against the protection flag of its page. A refused
    /// write sets the protection flag.
    pub fn write_allowed(&mut self, offset: u16) -> bool {
        if self.logical_space {
            return true;
        }
        if self.base_register[(offset >> 12) as usize] & PROTECT_FLAG != 0 {
            tracing::warn!("[AMIGO] Write to protected page at {:04X}", offset);
            self.protflag = 1;
            return false;
        }
        true
    }

    /// Mapper port read: returns and clears the protection flag.
    pub fn read(&mut self) -> u8 {
        let value = self.protflag;
        self.protflag = 0;
        value
    }

    /// Mapper port write: bit 0 selects load (set) or save, bits 1-3 the map.
    pub fn write(&mut self, data: u8) {
        let direction = if data & 1 != 0 {
            MapTransfer::Load
        } else {
            MapTransfer::Save
        };
        let map = ((data >> 1) & 7) as usize;
        tracing::debug!("[AMIGO] {:?} map {}", direction, map);
        self.dma = Some(MapperDma {
            direction,
            sram_address: map * MAP_SIZE,
            register: 0,
            byte: 0,
            value: 0,
        });
    }

    /// Moves one byte per rising edge while the CPU is on HOLD.
    pub fn clock_in(&mut self, state: LineState, sram: &mut [u8]) {
        if state.is_clear() || !self.hold_acknowledged || sram.is_empty() {
            return;
        }
        let Some(dma) = self.dma.as_mut() else {
            return;
        };

        let address = dma.sram_address % sram.len();
        let shift = 8 * (3 - dma.byte as u32);
        match dma.direction {
            MapTransfer::Load => {
                dma.value = (dma.value << 8) | sram[address] as u32;
            }
            MapTransfer::Save => {
                sram[address] = (self.base_register[dma.register] >> shift) as u8;
            }
        }
        dma.sram_address += 1;
        dma.byte += 1;

        if dma.byte == 4 {
            if dma.direction == MapTransfer::Load {
                self.base_register[dma.register] = dma.value;
            }
            dma.byte = 0;
            dma.value = 0;
            dma.register += 1;
        }

        if dma.register == self.base_register.len() {
            tracing::debug!("[AMIGO] {:?} complete, releasing HOLD", dma.direction);
            self.dma = None;
        }
    }

    /// HOLD request to the CPU.
    pub fn hold_out(&self) -> LineState {
        self.dma.is_some().into()
    }

    /// READY towards the CPU; low while a map transfer is running.
    pub fn cpury_out(&self) -> LineState {
        if self.dma.is_some() {
            LineState::Clear
        } else {
            self.srdy
        }
    }

    pub fn sramcs_out(&self) -> bool {
        self.sram_accessed
    }

    pub fn skdrcs_out(&self) -> LineState {
        self.dram_accessed.into()
    }

    pub fn mapper_accessed(&self) -> bool {
        self.mapper_accessed
    }

    pub fn base_registers(&self) -> &[u32; 16] {
        &self.base_register
    }

    pub fn reset(&mut self) {
        self.base_register = [0; 16];
        self.protflag = 0;
        self.dma = None;
        self.hold_acknowledged = false;
        self.srdy = LineState::Assert;
        self.sram_accessed = false;
        self.dram_accessed = false;
        self.mapper_accessed = false;
    }
}
