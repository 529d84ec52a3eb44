use serde::{Deserialize, Serialize};

use crate::{
    ams::AmsMapper,
    cru::{CruAddress, SAMS_CRU_BASE},
    error::ConfigError,
    peribox::PeriboxVariant,
    slot::{console_address, CardLines, PeripheralCard},
};

/// SuperAMS memory expansion card.
///
/// CRU bit 0 exposes the mapper registers at 0x4000-0x401F (mirrored over
/// the DSR area), CRU bit 1 turns on mapping. RAM lives in the usual 32K
/// expansion windows.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamsCard {
    mapper: AmsMapper,
}

impl SamsCard {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            mapper: AmsMapper::new(size)?,
        })
    }

    pub fn mapper(&self) -> &AmsMapper {
        &self.mapper
    }

    fn register_index(address: u16) -> usize {
        ((address >> 1) & 0x0F) as usize
    }
}

#[typetag::serde]
impl PeripheralCard for SamsCard {
    fn name(&self) -> &str {
        "SuperAMS memory expansion"
    }

    fn attach(&mut self, _lines: CardLines) {}

    fn readz(&mut self, offset: u32, value: &mut u8) {
        let Some(address) = console_address(offset) else {
            return;
        };

        if address & 0xE000 == 0x4000 {
            if let Some(register) = self.mapper.register_read(Self::register_index(address)) {
                *value = register;
            }
        } else if self.mapper.is_ram(address) {
            *value = self.mapper.read(address);
        }
    }

    fn write(&mut self, offset: u32, data: u8) {
        let Some(address) = console_address(offset) else {
            return;
        };

        if address & 0xE000 == 0x4000 {
            // Both bytes of a word reach the register; the even byte comes
            // last and wins.
            self.mapper.register_write(Self::register_index(address), data);
        } else if self.mapper.is_ram(address) {
            self.mapper.write(address, data);
        }
    }

    fn cruwrite(&mut self, offset: CruAddress, data: u8) {
        if !offset.in_page(SAMS_CRU_BASE) {
            return;
        }
        match offset.bit_in_page() {
            0 => self.mapper.set_access_mapper(data != 0),
            1 => self.mapper.set_map_mode(data != 0),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.mapper.reset();
    }

    fn supports(&self, variant: PeriboxVariant) -> bool {
        variant != PeriboxVariant::Geneve
    }

    fn supports_genmod(&self) -> bool {
        false
    }
}
