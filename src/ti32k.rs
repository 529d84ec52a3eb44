use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    peribox::PeriboxVariant,
    slot::{console_address, CardLines, PeripheralCard},
};

pub const MEMEX_SIZE: usize = 0x8000;

/// TI 32 KiB memory expansion card.
///
/// Low block 0x2000-0x3FFF, high block 0xA000-0xFFFF.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug, PartialEq)]
pub struct Memory32kCard {
    #[derivative(Debug = "ignore")]
    ram: Vec<u8>,
}

impl Default for Memory32kCard {
    fn default() -> Self {
        Self {
            ram: vec![0; MEMEX_SIZE],
        }
    }
}

impl Memory32kCard {
    pub fn new() -> Self {
        Self::default()
    }

    fn translate(offset: u32) -> Option<usize> {
        let address = console_address(offset)?;
        match address & 0xE000 {
            0x2000 => Some((address - 0x2000) as usize),
            0xA000 | 0xC000 | 0xE000 => Some((address - 0xA000) as usize + 0x2000),
            _ => None,
        }
    }
}

#[typetag::serde]
impl PeripheralCard for Memory32kCard {
    fn name(&self) -> &str {
        "32K memory expansion"
    }

    fn attach(&mut self, _lines: CardLines) {}

    fn readz(&mut self, offset: u32, value: &mut u8) {
        if let Some(index) = Self::translate(offset) {
            *value = self.ram[index];
        }
    }

    fn write(&mut self, offset: u32, data: u8) {
        if let Some(index) = Self::translate(offset) {
            self.ram[index] = data;
        }
    }

    fn supports(&self, variant: PeriboxVariant) -> bool {
        variant != PeriboxVariant::Geneve
    }

    fn supports_genmod(&self) -> bool {
        false
    }
}
