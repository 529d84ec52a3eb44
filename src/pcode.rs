use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    cru::{CruAddress, PCODE_CRU_BASE},
    error::ConfigError,
    grom::{GromLibrary, GROM_SIZE},
    peribox::PeriboxVariant,
    signal::LineState,
    slot::{CardLines, DsrSelect, PeripheralCard},
};

pub const PCODE_ROM_SIZE: usize = 0x3000;
pub const PCODE_GROM_CHIPS: u8 = 8;

/// UCSD p-System card.
///
/// 12 KiB of DSR ROM (4 KiB fixed at 0x4000, two switchable 4 KiB banks at
/// 0x5000) and eight private GROMs with ports inside the DSR area. The
/// GROMs run on CLKOUT divided by 8.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct PcodeCard {
    #[derivative(Debug = "ignore")]
    rom: Vec<u8>,
    groms: GromLibrary,
    bank_select: u8,
    /// Front panel switch.
    active: bool,
    selected: bool,
    clock_count: u8,
    clock_high: bool,
    in_dsr_area: bool,
    is_rom0: bool,
    is_rom12: bool,
    is_grom: bool,
    address: u32,
    select: DsrSelect,
    genmod: bool,
    ready: LineState,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    lines: CardLines,
}

impl PcodeCard {
    pub fn new(rom: &[u8], grom: &[u8]) -> Result<Self, ConfigError> {
        if rom.len() > PCODE_ROM_SIZE {
            return Err(ConfigError::ImageTooLarge {
                name: "P-Code ROM",
                size: rom.len(),
                max: PCODE_ROM_SIZE,
            });
        }
        let grom_max = PCODE_GROM_CHIPS as usize * GROM_SIZE;
        if grom.len() > grom_max {
            return Err(ConfigError::ImageTooLarge {
                name: "P-Code GROM",
                size: grom.len(),
                max: grom_max,
            });
        }

        let mut data = vec![0; PCODE_ROM_SIZE];
        data[..rom.len()].copy_from_slice(rom);

        Ok(Self {
            rom: data,
            groms: GromLibrary::with_contents("pcode", PCODE_GROM_CHIPS, grom),
            bank_select: 1,
            active: true,
            selected: false,
            clock_count: 0,
            clock_high: false,
            in_dsr_area: false,
            is_rom0: false,
            is_rom12: false,
            is_grom: false,
            address: 0,
            select: DsrSelect::standard(),
            genmod: false,
            ready: LineState::Assert,
            lines: CardLines::default(),
        })
    }

    pub fn set_switch(&mut self, active: bool) {
        tracing::info!("[PCODE] Switch {}", if active { "on" } else { "off" });
        self.active = active;
    }

    pub fn groms(&self) -> &GromLibrary {
        &self.groms
    }

    fn update_ready(&mut self) {
        let ready = self.groms.ready();
        if ready != self.ready {
            self.ready = ready;
            self.lines.set_ready(ready);
        }
    }
}

#[typetag::serde]
impl PeripheralCard for PcodeCard {
    fn name(&self) -> &str {
        "P-Code card"
    }

    fn attach(&mut self, lines: CardLines) {
        self.lines = lines;
    }

    fn setaddress_dbin(&mut self, offset: u32, dbin: LineState) {
        self.address = offset;
        self.in_dsr_area = self.select.matches(offset);
        self.is_rom0 = offset & 0xF000 == 0x4000;
        self.is_rom12 = offset & 0xF000 == 0x5000;

        // GROM reads at 0x5BFx, writes at 0x5FFx
        let valid = dbin.is_clear() || offset & 0x0400 == 0;
        self.is_grom = offset & 0xFBFD == 0x5BFC && valid;

        if valid {
            // Always deliver, so that the GROMs see their deselection.
            let select = self.is_grom && self.active && self.selected && self.in_dsr_area;
            self.groms
                .set_lines(dbin, offset & 2 != 0, LineState::from(select));
            self.update_ready();
        }
    }

    fn readz(&mut self, _offset: u32, value: &mut u8) {
        if !(self.active && self.in_dsr_area && self.selected) {
            return;
        }

        if self.is_rom0 {
            *value = self.rom[(self.address & 0x0FFF) as usize];
        } else if self.is_grom {
            self.groms.readz(value);
            tracing::trace!("[PCODE] GROM read {:02X}", *value);
        } else if self.is_rom12 {
            let index = ((self.bank_select as u32) << 12) | (self.address & 0x0FFF);
            *value = self.rom[index as usize];
        }
    }

    fn write(&mut self, _offset: u32, data: u8) {
        if self.active && self.is_grom && self.selected {
            self.groms.write(data);
        }
    }

    fn cruwrite(&mut self, offset: CruAddress, data: u8) {
        if !offset.in_page(PCODE_CRU_BASE) {
            return;
        }
        // The bank bit sits on address line A8, hence 0x1F80.
        match offset.value() & 0x00FF {
            0x00 => {
                tracing::debug!("[PCODE] Card {}", if data != 0 { "on" } else { "off" });
                self.selected = data != 0;
            }
            0x80 => {
                self.bank_select = if data != 0 { 2 } else { 1 };
                tracing::debug!("[PCODE] ROM bank {}", self.bank_select);
            }
            _ => {}
        }
    }

    fn clock_in(&mut self, _state: LineState) {
        // Four edges high, four edges low
        self.clock_count = (self.clock_count + 1) & 0x03;
        if self.clock_count == 0 {
            self.clock_high = !self.clock_high;
            self.groms.gclock_in(LineState::from(self.clock_high));
            self.update_ready();
        }
    }

    fn set_genmod(&mut self, genmod: bool) {
        self.genmod = genmod;
        self.select = DsrSelect::for_genmod(genmod);
    }

    fn reset(&mut self) {
        self.select = DsrSelect::for_genmod(self.genmod);
        self.bank_select = 1;
        self.selected = false;
        self.clock_count = 0;
        self.clock_high = false;
        self.is_rom0 = false;
        self.is_rom12 = false;
        self.is_grom = false;
        self.address = 0;
        self.groms.reset();
        self.update_ready();
    }

    fn supports(&self, variant: PeriboxVariant) -> bool {
        variant != PeriboxVariant::Geneve
    }
}
