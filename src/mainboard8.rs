use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    amigo::Amigo,
    config::Mainboard8Config,
    cru::CruAddress,
    device::ByteDevice,
    error::ConfigError,
    grom::{GromLibrary, GROM_SIZE},
    machine::Message,
    mofetta::Mofetta,
    oso::Oso,
    peribox::{IoportLines, PeripheralBox, PeriboxVariant},
    signal::{LineState, WiredAnd},
    slot::PeripheralCard,
    state::Relink,
    vaquerro::{Vaquerro, GROM_LIBRARIES},
};

pub const ROM0_SIZE: usize = 0x2000;
pub const ROM1_SIZE: usize = 0x8000;
pub const PASCAL_ROM_SIZE: usize = 0x10000;
pub const SRAM_SIZE: usize = 0x800;

/// Chips per GROM library: system, text-to-speech, P8, P3.
pub const LIBRARY_CHIPS: [u8; GROM_LIBRARIES] = [3, 8, 8, 3];
const LIBRARY_NAMES: [&str; GROM_LIBRARIES] = ["system", "text-to-speech", "P8", "P3"];

/// Contributors to the system READY line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySource {
    Vaquerro = 0,
    Grom = 1,
    Sound = 2,
    Pbox = 3,
    Speech = 4,
}

/// Memory mapped devices of the console. The mainboard decodes their
/// selects and calls them with the TI-99/4A address of the selected port,
/// so the same devices work on both consoles.
#[derive(Default)]
pub struct ConsoleDevices {
    pub sound: Option<Box<dyn ByteDevice>>,
    pub video: Option<Box<dyn ByteDevice>>,
    pub speech: Option<Box<dyn ByteDevice>>,
    pub cartridge: Option<Box<dyn ByteDevice>>,
}

impl ConsoleDevices {
    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ByteDevice>> {
        [
            self.sound.as_mut(),
            self.video.as_mut(),
            self.speech.as_mut(),
            self.cartridge.as_mut(),
        ]
        .into_iter()
        .flatten()
    }
}

fn device_ready(device: &Option<Box<dyn ByteDevice>>) -> LineState {
    device
        .as_ref()
        .map_or(LineState::Assert, |device| device.ready())
}

/// TI-99/8 main board.
///
/// Vaquerro decodes the logical space and generates the wait states,
/// Amigo maps logical to physical addresses, Mofetta decodes the physical
/// space and Oso talks to the Hexbus. The CPU side is 8 bits wide: a cycle
/// is `set_address`, then `read` or `write` once READY is asserted. Writes
/// issued early are latched and committed when READY rises.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Mainboard8 {
    vaquerro: Vaquerro,
    mofetta: Mofetta,
    amigo: Amigo,
    oso: Oso,
    #[derivative(Debug = "ignore")]
    rom0: Vec<u8>,
    #[derivative(Debug = "ignore")]
    rom1: Vec<u8>,
    #[derivative(Debug = "ignore")]
    pascal: Vec<u8>,
    #[derivative(Debug = "ignore")]
    sram: Vec<u8>,
    #[derivative(Debug = "ignore")]
    dram: Vec<u8>,
    groms: Vec<GromLibrary>,
    peribox: Option<PeripheralBox>,
    ready: WiredAnd,
    logical_address: u16,
    physical_address: u32,
    dbin: LineState,
    pending_write: bool,
    latched_data: u8,
    prev_grom: u8,
    gromclk: LineState,
    crus: LineState,
    crugl: LineState,
    extint: LineState,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    devices: ConsoleDevices,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    queue: Rc<RefCell<VecDeque<Message>>>,
}

impl Mainboard8 {
    pub fn vaquerro(&self) -> &Vaquerro {
        &self.vaquerro
    }

    pub fn mofetta(&self) -> &Mofetta {
        &self.mofetta
    }

    pub fn amigo(&self) -> &Amigo {
        &self.amigo
    }

    pub fn oso(&self) -> &Oso {
        &self.oso
    }

    pub fn oso_mut(&mut self) -> &mut Oso {
        &mut self.oso
    }

    pub fn peribox(&self) -> Option<&PeripheralBox> {
        self.peribox.as_ref()
    }

    pub fn peribox_mut(&mut self) -> Option<&mut PeripheralBox> {
        self.peribox.as_mut()
    }

    pub fn grom_library(&self, library: usize) -> Option<&GromLibrary> {
        self.groms.get(library)
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn dram(&self) -> &[u8] {
        &self.dram
    }

    pub fn physical_address(&self) -> u32 {
        self.physical_address
    }

    pub fn is_write_pending(&self) -> bool {
        self.pending_write
    }

    /// Starts a memory cycle.
    pub fn set_address(&mut self, offset: u16, dbin: LineState) {
        self.logical_address = offset;
        self.dbin = dbin;
        self.pending_write = false;

        self.vaquerro.memen_in(LineState::Assert);
        self.vaquerro.set_address(offset, dbin);
        let lascs = self.vaquerro.lascsq_out();

        self.amigo.memen_in(LineState::Assert);
        self.amigo.lascs_in(lascs);
        self.mofetta.lascs_in(lascs);
        self.mofetta.pmemen_in(lascs.is_clear().into());
        self.amigo.set_address(offset);

        if lascs.is_asserted() {
            self.mofetta.set_address(offset, dbin);
            if let Some(peribox) = self.peribox.as_mut() {
                peribox.memen_in(LineState::Clear);
            }
        } else {
            self.physical_address = self.amigo.physical_address();
            self.set_physical_address(dbin);
        }

        self.select_groms();
        self.update_ready();
    }

    /// Completes a read cycle. Call once READY is asserted.
    pub fn read(&mut self) -> u8 {
        let offset = self.logical_address;
        let mut value = 0;

        if self.vaquerro.lascsq_out().is_asserted() {
            if self.vaquerro.sromcs_out() {
                value = self.rom0[(offset & 0x1FFF) as usize];
            } else if self.amigo.sramcs_out() {
                value = self.sram[self.sram_index(offset)];
            } else if self.amigo.mapper_accessed() {
                value = self.amigo.read();
            } else if self.vaquerro.vdprd_out() {
                if let Some(video) = self.devices.video.as_mut() {
                    video.readz(0x8800 | (offset & 2), &mut value);
                }
            } else if self.vaquerro.sprd_out() {
                if let Some(speech) = self.devices.speech.as_mut() {
                    speech.readz(0x9000, &mut value);
                }
            } else if self.mofetta.alccs_out() {
                value = self.oso.read(offset);
            } else if let Some(library) = self.selected_grom() {
                self.groms[library].readz(&mut value);
            }
        } else {
            value = self.physical_read();
        }

        tracing::trace!("[MB8] read {:04X} -> {:02X}", offset, value);
        self.cycle_end();
        value
    }

    /// Writes now if READY is asserted, otherwise latches the byte until
    /// READY rises.
    pub fn write(&mut self, data: u8) {
        if self.ready().is_asserted() {
            self.commit_write(data);
        } else {
            tracing::trace!("[MB8] Latching {:02X}", data);
            self.pending_write = true;
            self.latched_data = data;
        }
    }

    /// CRU input bit. Bits nobody answers read as 0.
    pub fn cru_read(&mut self, offset: CruAddress) -> u8 {
        let mut value = 0;
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.crureadz(offset, &mut value);
        }
        self.update_ready();
        value
    }

    pub fn cru_write(&mut self, offset: CruAddress, data: u8) {
        tracing::trace!("[MB8] {} <- {}", offset, data);
        self.mofetta.cruwrite(offset, data);
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.cruwrite(offset, data);
        }
        self.update_ready();
    }

    pub fn clock_in(&mut self, state: LineState) {
        self.vaquerro.clock_in(state);

        if let Some(level) = self.mofetta.clock_in(state) {
            self.gromclk = level;
            for library in self.groms.iter_mut() {
                library.gclock_in(level);
            }
            if let Some(cartridge) = self.devices.cartridge.as_mut() {
                cartridge.gromclk_in(level);
            }
        }

        for device in self.devices.iter_mut() {
            device.clock_in(state);
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.clock_in(state);
        }
        self.amigo.clock_in(state, &mut self.sram);
        self.oso.clock_in(state);

        self.select_groms();
        self.update_ready();
    }

    /// Runs the board for `cycles` clock cycles.
    pub fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.clock_in(LineState::Assert);
            self.clock_in(LineState::Clear);
        }
    }

    /// READY towards the CPU (through Amigo).
    pub fn ready(&self) -> LineState {
        self.amigo.cpury_out()
    }

    pub fn is_ready(&self) -> bool {
        self.ready().is_asserted()
    }

    /// Clocks until READY is asserted. Returns the cycles spent, or `None`
    /// if READY is still low after `max_cycles`.
    pub fn run_until_ready(&mut self, max_cycles: u64) -> Option<u64> {
        let mut cycles = 0;
        while !self.is_ready() {
            if cycles == max_cycles {
                tracing::warn!("[MB8] READY still low after {} cycles", cycles);
                return None;
            }
            self.tick(1);
            cycles += 1;
        }
        Some(cycles)
    }

    /// Complete read cycle including the wait states.
    pub fn read_byte(&mut self, offset: u16, max_cycles: u64) -> Option<u8> {
        self.set_address(offset, LineState::Assert);
        self.run_until_ready(max_cycles)?;
        Some(self.read())
    }

    /// Complete write cycle; returns the wait states spent.
    pub fn write_byte(&mut self, offset: u16, data: u8, max_cycles: u64) -> Option<u64> {
        self.set_address(offset, LineState::Clear);
        self.write(data);
        self.run_until_ready(max_cycles)
    }

    /// HOLD request towards the CPU (mapper DMA).
    pub fn hold(&self) -> LineState {
        self.amigo.hold_out()
    }

    pub fn holda_in(&mut self, state: LineState) {
        self.amigo.holda_in(state);
    }

    /// Selects the TI-99/4A compatible map (asserted) or the native map.
    pub fn crus_in(&mut self, state: LineState) {
        self.crus = state;
        self.vaquerro.crus_in(state);
        self.amigo.crus_in(state);
    }

    /// Enables GROM libraries 1 to 3.
    pub fn crugl_in(&mut self, state: LineState) {
        self.crugl = state;
        self.vaquerro.crugl_in(state);
    }

    /// Interrupt request from the box.
    pub fn extint(&self) -> LineState {
        self.extint
    }

    pub fn gromclk(&self) -> LineState {
        self.gromclk
    }

    pub fn reset(&mut self) {
        tracing::info!("[MB8] Reset");
        self.vaquerro.reset();
        self.mofetta.reset();
        self.amigo.reset();
        self.oso.reset();
        self.vaquerro.crus_in(self.crus);
        self.amigo.crus_in(self.crus);
        self.vaquerro.crugl_in(self.crugl);

        for library in self.groms.iter_mut() {
            library.reset();
        }
        for device in self.devices.iter_mut() {
            device.reset();
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.reset();
        }

        self.ready.clear();
        self.pending_write = false;
        self.prev_grom = 0;
        self.gromclk = LineState::Clear;
        self.extint = LineState::Clear;
        self.join_ready();
    }

    /// Sends the two address words to Mofetta and the box.
    fn set_physical_address(&mut self, dbin: LineState) {
        let physical = self.physical_address;
        let low = physical as u16;

        self.mofetta.skdrcs_in(self.amigo.skdrcs_out());
        self.mofetta.msast_in(LineState::Assert);
        self.mofetta.set_address((physical >> 16) as u16, dbin);
        self.mofetta.msast_in(LineState::Clear);
        self.mofetta.set_address(low, dbin);

        if self.mofetta.cmas_out() {
            if let Some(cartridge) = self.devices.cartridge.as_mut() {
                cartridge.setaddress_dbin(low, dbin);
            }
        }

        if let Some(peribox) = self.peribox.as_mut() {
            // The high word goes out with MEMEN cleared and is ignored.
            peribox.msast_in(LineState::Assert);
            peribox.memen_in(LineState::Clear);
            peribox.setaddress_dbin(physical >> 16, dbin);
            peribox.msast_in(LineState::Clear);

            let dbc = self.mofetta.dbc_out();
            peribox.memen_in(dbc.into());
            if dbc {
                peribox.setaddress_dbin(low as u32, dbin);
            }
        }
    }

    fn physical_read(&mut self) -> u8 {
        let physical = self.physical_address;
        let low = physical as u16;
        let mut value = 0;

        if self.mofetta.rom1cs_out() {
            value = self.rom1.get(self.mofetta.rom1_offset()).copied().unwrap_or(0);
        } else if self.mofetta.prcs_out() {
            value = self.pascal.get(low as usize).copied().unwrap_or(0);
        } else if self.mofetta.cmas_out() {
            if let Some(cartridge) = self.devices.cartridge.as_mut() {
                cartridge.readz(low, &mut value);
            }
        } else if self.amigo.skdrcs_out().is_asserted() {
            value = self.dram[physical as usize & (self.dram.len() - 1)];
        } else if self.mofetta.dbc_out() {
            if let Some(peribox) = self.peribox.as_mut() {
                peribox.readz(low as u32, &mut value);
            }
        }
        value
    }

    fn commit_write(&mut self, data: u8) {
        let offset = self.logical_address;
        self.pending_write = false;
        tracing::trace!("[MB8] write {:04X} <- {:02X}", offset, data);

        if self.vaquerro.lascsq_out().is_asserted() {
            if self.vaquerro.sromcs_out() {
                tracing::warn!("[MB8] Ignoring write to ROM0 at {:04X}", offset);
            } else if self.amigo.sramcs_out() {
                let index = self.sram_index(offset);
                self.sram[index] = data;
            } else if self.amigo.mapper_accessed() {
                self.amigo.write(data);
            } else if self.vaquerro.sndcs_out() {
                if let Some(sound) = self.devices.sound.as_mut() {
                    sound.write(0x8400, data);
                }
            } else if self.vaquerro.vdpwt_out() {
                if let Some(video) = self.devices.video.as_mut() {
                    video.write(0x8C00 | (offset & 2), data);
                }
            } else if self.vaquerro.spwt_out() {
                if let Some(speech) = self.devices.speech.as_mut() {
                    speech.write(0x9400, data);
                }
            } else if self.mofetta.alccs_out() {
                self.oso.write(offset, data);
            } else if let Some(library) = self.selected_grom() {
                self.groms[library].write(data);
            }
        } else if self.amigo.write_allowed(offset) {
            self.physical_write(data);
        }

        self.cycle_end();
    }

    fn physical_write(&mut self, data: u8) {
        let physical = self.physical_address;
        let low = physical as u16;

        if self.mofetta.rom1cs_out() || self.mofetta.prcs_out() {
            tracing::warn!("[MB8] Ignoring write to ROM at {:06X}", physical);
        } else if self.mofetta.cmas_out() {
            if let Some(cartridge) = self.devices.cartridge.as_mut() {
                cartridge.write(low, data);
            }
        } else if self.amigo.skdrcs_out().is_asserted() {
            let index = physical as usize & (self.dram.len() - 1);
            self.dram[index] = data;
        } else if self.mofetta.dbc_out() {
            if let Some(peribox) = self.peribox.as_mut() {
                peribox.write(low as u32, data);
            }
        }
    }

    /// End of the memory cycle: the wait state generators are reset and
    /// the GROM select is dropped.
    fn cycle_end(&mut self) {
        self.vaquerro.treset();
        self.select_groms();
        self.join_ready();
    }

    fn sram_index(&self, offset: u16) -> usize {
        if self.crus.is_asserted() {
            (offset & 0x03FF) as usize
        } else {
            (offset & 0x07FF) as usize
        }
    }

    fn selected_grom(&self) -> Option<usize> {
        let gromcs = self.vaquerro.gromcs_out();
        (0..GROM_LIBRARIES).find(|library| gromcs & (1 << library) != 0)
    }

    /// Passes Vaquerro's collective GROM select to the libraries when it
    /// changes.
    fn select_groms(&mut self) {
        let gromcs = self.vaquerro.gromcs_out();
        if gromcs == self.prev_grom {
            return;
        }
        tracing::trace!("[MB8] GROM select {:X} -> {:X}", self.prev_grom, gromcs);
        self.prev_grom = gromcs;

        let a14 = self.vaquerro.a14();
        for (library, groms) in self.groms.iter_mut().enumerate() {
            let select = gromcs & (1 << library) != 0;
            groms.set_lines(self.dbin, a14, select.into());
        }
    }

    /// Recomputes READY and commits a latched write once it is asserted.
    fn update_ready(&mut self) {
        self.join_ready();
        if self.pending_write && self.is_ready() {
            let data = self.latched_data;
            self.commit_write(data);
        }
    }

    fn join_ready(&mut self) {
        while let Some(message) = self.queue.borrow_mut().pop_front() {
            match message {
                Message::ExtInt(state) => self.extint = state,
                Message::IoportReady(state) => {
                    self.ready.join_ready(ReadySource::Pbox as usize, state);
                }
            }
        }

        let mut groms_ready = true;
        for (library, groms) in self.groms.iter().enumerate() {
            let ready = groms.ready();
            self.vaquerro.grom_ready_in(library, ready);
            groms_ready &= ready.is_asserted();
        }

        self.ready
            .join_ready(ReadySource::Vaquerro as usize, self.vaquerro.ready());
        self.ready
            .join_ready(ReadySource::Grom as usize, groms_ready.into());
        self.ready.join_ready(
            ReadySource::Sound as usize,
            device_ready(&self.devices.sound),
        );
        self.ready.join_ready(
            ReadySource::Speech as usize,
            device_ready(&self.devices.speech),
        );
        self.amigo.srdy_in((!self.ready.is_pulled()).into());
    }
}

impl Relink for Mainboard8 {
    fn relink(&mut self, previous: &mut Self) {
        self.queue = previous.queue.clone();
        self.devices = std::mem::take(&mut previous.devices);
        if let (Some(peribox), Some(old)) = (self.peribox.as_mut(), previous.peribox.as_mut()) {
            peribox.relink(old);
        }
    }
}

#[derive(Default)]
pub struct Mainboard8Builder {
    config: Mainboard8Config,
    rom0: Vec<u8>,
    rom1: Vec<u8>,
    pascal: Vec<u8>,
    groms: [Vec<u8>; GROM_LIBRARIES],
    cards: Vec<(usize, Box<dyn PeripheralCard>)>,
    devices: ConsoleDevices,
}

impl Mainboard8Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: Mainboard8Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn rom0(&mut self, data: &[u8]) -> &mut Self {
        self.rom0 = data.to_vec();
        self
    }

    pub fn rom1(&mut self, data: &[u8]) -> &mut Self {
        self.rom1 = data.to_vec();
        self
    }

    pub fn pascal_rom(&mut self, data: &[u8]) -> &mut Self {
        self.pascal = data.to_vec();
        self
    }

    /// Contents of GROM library `library` (0 system, 1 text-to-speech,
    /// 2 P8, 3 P3).
    pub fn grom_library(&mut self, library: usize, data: &[u8]) -> &mut Self {
        if let Some(slot) = self.groms.get_mut(library) {
            *slot = data.to_vec();
        } else {
            tracing::warn!("[MB8] There is no GROM library {}", library);
        }
        self
    }

    pub fn dram_size(&mut self, size: usize) -> &mut Self {
        self.config.dram_size = size;
        self
    }

    pub fn crus(&mut self, enabled: bool) -> &mut Self {
        self.config.crus = enabled;
        self
    }

    pub fn crugl(&mut self, enabled: bool) -> &mut Self {
        self.config.crugl = enabled;
        self
    }

    pub fn peribox(&mut self, enabled: bool) -> &mut Self {
        self.config.peribox = enabled;
        self
    }

    pub fn card(&mut self, slot: usize, card: Box<dyn PeripheralCard>) -> &mut Self {
        self.cards.push((slot, card));
        self
    }

    pub fn sound(&mut self, device: Box<dyn ByteDevice>) -> &mut Self {
        self.devices.sound = Some(device);
        self
    }

    pub fn video(&mut self, device: Box<dyn ByteDevice>) -> &mut Self {
        self.devices.video = Some(device);
        self
    }

    pub fn speech(&mut self, device: Box<dyn ByteDevice>) -> &mut Self {
        self.devices.speech = Some(device);
        self
    }

    pub fn cartridge(&mut self, device: Box<dyn ByteDevice>) -> &mut Self {
        self.devices.cartridge = Some(device);
        self
    }

    /// Builds the board. Cards and devices are moved into it.
    pub fn build(&mut self) -> Result<Mainboard8, ConfigError> {
        self.config.validate()?;

        let rom0 = padded("ROM0", &self.rom0, ROM0_SIZE)?;
        let rom1 = padded("ROM1", &self.rom1, ROM1_SIZE)?;
        let pascal = padded("Pascal ROM", &self.pascal, PASCAL_ROM_SIZE)?;

        let mut groms = Vec::with_capacity(GROM_LIBRARIES);
        for library in 0..GROM_LIBRARIES {
            let chips = LIBRARY_CHIPS[library];
            let data = &self.groms[library];
            let max = chips as usize * GROM_SIZE;
            if data.len() > max {
                return Err(ConfigError::ImageTooLarge {
                    name: LIBRARY_NAMES[library],
                    size: data.len(),
                    max,
                });
            }
            groms.push(GromLibrary::with_contents(LIBRARY_NAMES[library], chips, data));
        }

        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let peribox = if self.config.peribox {
            let mut peribox = PeripheralBox::new(PeriboxVariant::Standard);
            for (slot, card) in self.cards.drain(..) {
                peribox.insert(slot, card)?;
            }
            let extint = queue.clone();
            let ready = queue.clone();
            peribox.connect_ioport(IoportLines {
                extint: Some(Box::new(move |state| {
                    extint.borrow_mut().push_back(Message::ExtInt(state))
                })),
                ready: Some(Box::new(move |state| {
                    ready.borrow_mut().push_back(Message::IoportReady(state))
                })),
            });
            Some(peribox)
        } else {
            if !self.cards.is_empty() {
                tracing::warn!(
                    "[MB8] No expansion box configured, ignoring {} cards",
                    self.cards.len()
                );
                self.cards.clear();
            }
            None
        };

        tracing::info!(
            "[MB8] Initializing TI-99/8 with {} KiB DRAM",
            self.config.dram_size / 1024
        );

        let mut mainboard = Mainboard8 {
            vaquerro: Vaquerro::new(),
            mofetta: Mofetta::new(),
            amigo: Amigo::new(),
            oso: Oso::new(),
            rom0,
            rom1,
            pascal,
            sram: vec![0; SRAM_SIZE],
            dram: vec![0; self.config.dram_size],
            groms,
            peribox,
            ready: WiredAnd::new(),
            logical_address: 0,
            physical_address: 0,
            dbin: LineState::Clear,
            pending_write: false,
            latched_data: 0,
            prev_grom: 0,
            gromclk: LineState::Clear,
            crus: self.config.crus.into(),
            crugl: self.config.crugl.into(),
            extint: LineState::Clear,
            devices: std::mem::take(&mut self.devices),
            queue,
        };
        mainboard.reset();
        Ok(mainboard)
    }
}

fn padded(name: &'static str, data: &[u8], size: usize) -> Result<Vec<u8>, ConfigError> {
    if data.len() > size {
        return Err(ConfigError::ImageTooLarge {
            name,
            size: data.len(),
            max: size,
        });
    }
    let mut image = vec![0; size];
    image[..data.len()].copy_from_slice(data);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vaquerro::GROM_WAIT_CYCLES;

    fn board() -> Mainboard8 {
        let mut rom0 = vec![0; ROM0_SIZE];
        rom0[0] = 0x83;
        let mut rom1 = vec![0; ROM1_SIZE];
        rom1[0x4000] = 0x99;
        let mut grom = vec![0; GROM_SIZE];
        grom[0] = 0xAA;
        Mainboard8Builder::new()
            .rom0(&rom0)
            .rom1(&rom1)
            .grom_library(0, &grom)
            .build()
            .expect("valid configuration")
    }

    #[test]
    fn test_boot_decode() {
        let mut board = board();
        board.set_address(0x0000, LineState::Assert);
        assert!(board.is_ready());
        assert!(board.vaquerro().sromcs_out());
        assert_eq!(board.read(), 0x83);
    }

    #[test]
    fn test_grom_access() {
        let mut board = board();
        board.write_byte(0x9C02, 0x00, 100).expect("GROM answers");
        board.write_byte(0x9C02, 0x00, 100).expect("GROM answers");
        assert_eq!(board.grom_library(0).map(|groms| groms.address()), Some(1));

        board.set_address(0x9800, LineState::Assert);
        for _ in 1..GROM_WAIT_CYCLES {
            board.tick(1);
            assert!(!board.is_ready());
        }
        let waited = board.run_until_ready(100).expect("GROM answers");
        assert!(waited > 0);
        assert_eq!(board.read(), 0xAA);
        assert_eq!(board.vaquerro().gromcs_out(), 0);
    }

    #[test]
    fn test_sram_and_dram() {
        let mut board = board();
        assert_eq!(board.write_byte(0x8302, 0x12, 10), Some(0));
        assert_eq!(board.sram()[0x302], 0x12);

        // All base registers are 0 after reset.
        board.write_byte(0x2123, 0x5A, 10);
        assert_eq!(board.physical_address(), 0x000123);
        assert_eq!(board.dram()[0x123], 0x5A);
        assert_eq!(board.read_byte(0x5123, 10), Some(0x5A));
    }

    #[test]
    fn test_mapper_load_and_dsr() {
        let mut board = board();
        // Map 0, register 4 -> FF4000
        for (index, byte) in [0x00, 0xFF, 0x40, 0x00].into_iter().enumerate() {
            board.write_byte(0x8010 + index as u16, byte, 10);
        }

        board.set_address(0x8810, LineState::Clear);
        board.write(0x01);
        assert_eq!(board.hold(), LineState::Assert);
        assert!(!board.is_ready());

        board.holda_in(LineState::Assert);
        board.tick(64);
        board.holda_in(LineState::Clear);
        assert_eq!(board.hold(), LineState::Clear);
        assert!(board.is_ready());
        assert_eq!(board.amigo().base_registers()[4], 0x00FF_4000);

        board.cru_write(CruAddress::new(0x1700), 1);
        assert_eq!(board.read_byte(0x4000, 10), Some(0x99));
        assert_eq!(board.physical_address(), 0xFF4000);

        // Without the DSR the access goes to the (empty) box.
        board.cru_write(CruAddress::new(0x1700), 0);
        assert_eq!(board.read_byte(0x4000, 10), Some(0x00));
        assert!(board.mofetta().dbc_out());
    }

    #[test]
    fn test_native_map_reaches_oso() {
        let mut board = board();
        board.crus_in(LineState::Clear);
        board.write_byte(0xF880, 0x3C, 10);
        assert_eq!(board.read_byte(0xF886, 10), Some(0x3C));
        assert_eq!(board.read_byte(0x0000, 10), Some(0x83));
    }

    #[test]
    fn test_oversized_image() {
        assert!(matches!(
            Mainboard8Builder::new().rom0(&[0; ROM0_SIZE + 1]).build(),
            Err(ConfigError::ImageTooLarge { .. })
        ));
    }
}
