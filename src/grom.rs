use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{device::ByteDevice, signal::LineState};

/// Bytes covered by one GROM chip.
pub const GROM_SIZE: usize = 0x2000;

/// Rising GROMCLK edges from selection until the chips release READY.
pub const GROM_READY_CLOCKS: u8 = 2;

/// A set of TMC0430 GROMs sharing one address counter.
///
/// All chips of a library see every address write, so they always agree on
/// the counter; only the chip whose number matches the three top address
/// bits puts data on the bus.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug, PartialEq)]
pub struct GromLibrary {
    name: String,
    chips: u8,
    #[derivative(Debug = "ignore")]
    memory: Vec<u8>,
    address: u16,
    buffer: u8,
    low_byte: bool,
    selected: bool,
    dbin: LineState,
    address_mode: bool,
    wait: u8,
    gclock: LineState,
}

impl GromLibrary {
    pub fn new(name: &str, chips: u8) -> Self {
        Self {
            name: name.to_string(),
            chips,
            memory: vec![0; chips as usize * GROM_SIZE],
            address: 0,
            buffer: 0,
            low_byte: false,
            selected: false,
            dbin: LineState::Clear,
            address_mode: false,
            wait: 0,
            gclock: LineState::Clear,
        }
    }

    /// Creates the library with its contents. Chips are consecutive 8 KiB
    /// blocks of `data`; a short image leaves the tail zeroed.
    pub fn with_contents(name: &str, chips: u8, data: &[u8]) -> Self {
        let mut library = Self::new(name, chips);
        let len = data.len().min(library.memory.len());
        library.memory[..len].copy_from_slice(&data[..len]);
        library
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Address and control lines. `dbin` distinguishes reads from writes,
    /// `address_mode` (A14, the MO pin) selects the address register
    /// instead of the data port.
    pub fn set_lines(&mut self, dbin: LineState, address_mode: bool, select: LineState) {
        self.dbin = dbin;
        self.address_mode = address_mode;

        let select = select.is_asserted();
        if select && !self.selected {
            tracing::trace!("[GROM] {} selected, holding READY", self.name);
            self.wait = GROM_READY_CLOCKS;
        } else if !select {
            self.wait = 0;
        }
        self.selected = select;
    }

    pub fn gclock_in(&mut self, state: LineState) {
        let rising = state.is_asserted() && self.gclock.is_clear();
        self.gclock = state;
        if rising && self.wait > 0 {
            self.wait -= 1;
            if self.wait == 0 {
                tracing::trace!("[GROM] {} ready", self.name);
            }
        }
    }

    pub fn ready(&self) -> LineState {
        LineState::from(self.wait == 0)
    }

    pub fn readz(&mut self, value: &mut u8) {
        if !self.selected {
            return;
        }

        if self.address_mode {
            *value = if self.low_byte {
                (self.address & 0xFF) as u8
            } else {
                (self.address >> 8) as u8
            };
            self.low_byte = !self.low_byte;
        } else {
            *value = self.buffer;
            self.low_byte = false;
            self.prefetch();
        }
    }

    pub fn write(&mut self, data: u8) {
        if !self.selected {
            return;
        }

        if self.address_mode {
            self.address = (self.address << 8) | data as u16;
            if self.low_byte {
                tracing::trace!("[GROM] {} address set to G>{:04X}", self.name, self.address);
                self.prefetch();
            }
            self.low_byte = !self.low_byte;
        } else {
            tracing::trace!("[GROM] {} ignoring write of {:02X} to ROM", self.name, data);
            self.low_byte = false;
        }
    }

    pub fn reset(&mut self) {
        self.address = 0;
        self.buffer = 0;
        self.low_byte = false;
        self.selected = false;
        self.wait = 0;
        self.gclock = LineState::Clear;
    }

    fn prefetch(&mut self) {
        let chip = (self.address >> 13) as u8;
        if chip < self.chips {
            self.buffer = self.memory[self.address as usize];
        }
        // The counter wraps within the chip.
        self.address = (self.address & 0xE000) | (self.address.wrapping_add(1) & 0x1FFF);
    }
}

/// GROM library mapped into the console address space with separate read
/// and write ports (0x9800/0x9C00 on the TI-99/4A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GromPort {
    library: GromLibrary,
    read_base: u16,
    write_base: u16,
}

impl GromPort {
    pub fn new(library: GromLibrary, read_base: u16, write_base: u16) -> Self {
        Self {
            library,
            read_base,
            write_base,
        }
    }

    pub fn console(library: GromLibrary) -> Self {
        Self::new(library, 0x9800, 0x9C00)
    }

    pub fn library(&self) -> &GromLibrary {
        &self.library
    }
}

impl ByteDevice for GromPort {
    fn name(&self) -> &str {
        self.library.name()
    }

    fn setaddress_dbin(&mut self, offset: u16, dbin: LineState) {
        let port = offset & 0xFC01;
        let select = (port == self.read_base && dbin.is_asserted())
            || (port == self.write_base && dbin.is_clear());
        self.library
            .set_lines(dbin, offset & 2 != 0, LineState::from(select));
    }

    fn readz(&mut self, _offset: u16, value: &mut u8) {
        self.library.readz(value);
    }

    fn write(&mut self, _offset: u16, data: u8) {
        self.library.write(data);
    }

    fn gromclk_in(&mut self, state: LineState) {
        self.library.gclock_in(state);
    }

    fn ready(&self) -> LineState {
        self.library.ready()
    }

    fn reset(&mut self) {
        self.library.reset();
    }
}
