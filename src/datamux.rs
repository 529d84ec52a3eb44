use derivative::Derivative;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::{
    device::ByteDevice,
    error::ConfigError,
    grom::GromPort,
    peribox::PeripheralBox,
    signal::LineState,
    state::Relink,
};

pub const DEFAULT_WAIT_STATES: u8 = 2;
pub const CONSOLE_ROM_SIZE: usize = 0x2000;
pub const PAD_SIZE: usize = 0x100;
pub const RAM32K_SIZE: usize = 0x8000;

/// Target of the current access as decoded from the even address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decode {
    /// 16-bit console ROM, 0x0000-0x1FFF
    #[default]
    ConsoleRom,
    /// 16-bit scratch pad RAM, 0x8000-0x83FF
    Scratchpad,
    /// 16-bit 32K expansion (console modification)
    Ram32k,
    /// Everything on the 8-bit side, including the box
    Narrow,
}

/// Data bus multiplexer of the TI-99/4A.
///
/// The CPU sees a 16-bit bus. Console ROM and scratch pad are 16 bits wide;
/// all other devices sit on an 8-bit bus. Narrow accesses are split into
/// two byte accesses, odd byte first, with the odd byte held in a latch.
/// The multiplexer holds READY low until both halves are done.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Datamux {
    #[derivative(Debug = "ignore")]
    rom: Vec<u8>,
    #[serde(with = "BigArray")]
    #[derivative(Debug = "ignore")]
    pad: [u8; PAD_SIZE],
    #[derivative(Debug = "ignore")]
    ram32k: Option<Vec<u8>>,
    groms: Option<GromPort>,
    peribox: Option<PeripheralBox>,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    devices: Vec<Box<dyn ByteDevice>>,
    wait_states: u8,
    address: u16,
    dbin: LineState,
    decode: Decode,
    waitcount: u8,
    pending_even: bool,
    latch: u8,
    muxready: bool,
    sysready: LineState,
}

impl Datamux {
    pub fn new(rom: &[u8], use32k: bool, wait_states: u8) -> Result<Self, ConfigError> {
        if rom.len() > CONSOLE_ROM_SIZE {
            return Err(ConfigError::ImageTooLarge {
                name: "Console ROM",
                size: rom.len(),
                max: CONSOLE_ROM_SIZE,
            });
        }
        if wait_states == 0 {
            return Err(ConfigError::InvalidWaitStates);
        }

        let mut data = vec![0; CONSOLE_ROM_SIZE];
        data[..rom.len()].copy_from_slice(rom);

        Ok(Self {
            rom: data,
            pad: [0; PAD_SIZE],
            ram32k: use32k.then(|| vec![0; RAM32K_SIZE]),
            groms: None,
            peribox: None,
            devices: Vec::new(),
            wait_states,
            address: 0,
            dbin: LineState::Clear,
            decode: Decode::ConsoleRom,
            waitcount: 0,
            pending_even: false,
            latch: 0,
            muxready: true,
            sysready: LineState::Assert,
        })
    }

    pub fn attach_groms(&mut self, groms: GromPort) {
        self.groms = Some(groms);
    }

    pub fn attach_peribox(&mut self, peribox: PeripheralBox) {
        self.peribox = Some(peribox);
    }

    pub fn add_device(&mut self, device: Box<dyn ByteDevice>) {
        tracing::info!("[DMUX] Attaching {}", device.name());
        self.devices.push(device);
    }

    pub fn groms(&self) -> Option<&GromPort> {
        self.groms.as_ref()
    }

    pub fn peribox(&self) -> Option<&PeripheralBox> {
        self.peribox.as_ref()
    }

    pub fn peribox_mut(&mut self) -> Option<&mut PeripheralBox> {
        self.peribox.as_mut()
    }

    pub fn has_32k(&self) -> bool {
        self.ram32k.is_some()
    }

    pub fn wait_states(&self) -> u8 {
        self.wait_states
    }

    pub fn decode(&self) -> Decode {
        self.decode
    }

    pub fn latch(&self) -> u8 {
        self.latch
    }

    fn decode_address(&self, address: u16) -> Decode {
        match address & 0xE000 {
            0x0000 => Decode::ConsoleRom,
            0x8000 if address & 0xFC00 == 0x8000 => Decode::Scratchpad,
            0x2000 | 0xA000 | 0xC000 | 0xE000 if self.ram32k.is_some() => Decode::Ram32k,
            _ => Decode::Narrow,
        }
    }

    fn ram32k_index(address: u16) -> usize {
        if address < 0xA000 {
            (address - 0x2000) as usize
        } else {
            (address - 0xA000) as usize + 0x2000
        }
    }

    /// Starts a bus cycle. Narrow cycles put the odd address on the 8-bit
    /// bus and drop READY.
    pub fn set_address(&mut self, address: u16, dbin: LineState) {
        self.address = address & 0xFFFE;
        self.dbin = dbin;
        self.decode = self.decode_address(self.address);
        self.waitcount = 0;
        self.pending_even = false;
        self.muxready = true;

        tracing::trace!("[DMUX] set_address {:04X} {:?} dbin={}", self.address, self.decode, dbin);

        if self.decode == Decode::Narrow {
            self.waitcount = self.wait_states;
            self.pending_even = true;
            self.muxready = false;
            self.setaddress_all(self.address | 1);
        } else if let Some(peribox) = self.peribox.as_mut() {
            peribox.memen_in(LineState::Clear);
        }
    }

    pub fn read(&mut self) -> u16 {
        let address = self.address;
        match self.decode {
            Decode::ConsoleRom => {
                let index = (address & 0x1FFE) as usize;
                u16::from_be_bytes([self.rom[index], self.rom[index + 1]])
            }
            Decode::Scratchpad => {
                let index = (address & 0x00FE) as usize;
                u16::from_be_bytes([self.pad[index], self.pad[index + 1]])
            }
            Decode::Ram32k => match self.ram32k.as_ref() {
                Some(ram) => {
                    let index = Self::ram32k_index(address);
                    u16::from_be_bytes([ram[index], ram[index + 1]])
                }
                None => 0,
            },
            Decode::Narrow => {
                let high = self.read_all(address);
                let value = ((high as u16) << 8) | self.latch as u16;
                tracing::trace!("[DMUX] read {:04X} -> {:04X}", address, value);
                value
            }
        }
    }

    pub fn write(&mut self, data: u16) {
        let address = self.address;
        let [high, low] = data.to_be_bytes();
        match self.decode {
            Decode::ConsoleRom => {
                tracing::trace!("[DMUX] Ignoring write to console ROM at {:04X}", address);
            }
            Decode::Scratchpad => {
                let index = (address & 0x00FE) as usize;
                self.pad[index] = high;
                self.pad[index + 1] = low;
            }
            Decode::Ram32k => {
                if let Some(ram) = self.ram32k.as_mut() {
                    let index = Self::ram32k_index(address);
                    ram[index] = high;
                    ram[index + 1] = low;
                }
            }
            Decode::Narrow => {
                tracing::trace!("[DMUX] write {:04X} <- {:04X}", address, data);
                self.write_all(address | 1, low);
                self.latch = high;
            }
        }
    }

    /// CLKOUT from the CPU. Advances a narrow cycle unless the external
    /// READY holds it.
    pub fn clock_in(&mut self, state: LineState) {
        for device in self.devices.iter_mut() {
            device.clock_in(state);
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.clock_in(state);
        }

        if self.waitcount == 0 && !self.pending_even {
            return;
        }
        if self.sysready.is_clear() {
            tracing::trace!("[DMUX] Stalled by READY");
            return;
        }

        if state.is_asserted() {
            if self.waitcount > 0 {
                self.waitcount -= 1;
            }
            if self.dbin.is_asserted() && self.pending_even {
                self.latch = self.read_all(self.address | 1);
                self.setaddress_all(self.address);
                self.pending_even = false;
            }
            if self.waitcount == 0 {
                self.muxready = true;
            }
        } else if self.dbin.is_clear() && self.pending_even && self.waitcount < self.wait_states {
            self.setaddress_all(self.address);
            self.write_all(self.address, self.latch);
            self.pending_even = false;
        }
    }

    /// READY from the box (external READY of the 8-bit bus).
    pub fn ready_in(&mut self, state: LineState) {
        self.sysready = state;
    }

    /// Own READY joined with the external one.
    pub fn ready_line(&self) -> LineState {
        (self.muxready && self.sysready.is_asserted()).into()
    }

    pub fn gromclk_in(&mut self, state: LineState) {
        if let Some(groms) = self.groms.as_mut() {
            groms.gromclk_in(state);
        }
        for device in self.devices.iter_mut() {
            device.gromclk_in(state);
        }
    }

    pub fn grom_ready(&self) -> LineState {
        self.groms
            .as_ref()
            .map_or(LineState::Assert, |groms| groms.ready())
    }

    /// READY of the other 8-bit devices (sound, video, speech).
    pub fn devices_ready(&self) -> LineState {
        self.devices
            .iter()
            .all(|device| device.ready().is_asserted())
            .into()
    }

    pub fn reset(&mut self) {
        self.waitcount = 0;
        self.pending_even = false;
        self.latch = 0;
        self.muxready = true;
        self.sysready = LineState::Assert;
        self.decode = Decode::ConsoleRom;
        if let Some(groms) = self.groms.as_mut() {
            groms.reset();
        }
        for device in self.devices.iter_mut() {
            device.reset();
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.reset();
        }
    }

    /// Presents an address on the 8-bit bus; MEMEN is asserted towards the
    /// box for the rest of the cycle.
    fn setaddress_all(&mut self, address: u16) {
        let dbin = self.dbin;
        if let Some(groms) = self.groms.as_mut() {
            groms.setaddress_dbin(address, dbin);
        }
        for device in self.devices.iter_mut() {
            device.setaddress_dbin(address, dbin);
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.memen_in(LineState::Assert);
            peribox.setaddress_dbin(address as u32, dbin);
        }
    }

    fn read_all(&mut self, address: u16) -> u8 {
        let mut value = 0;
        if let Some(groms) = self.groms.as_mut() {
            groms.readz(address, &mut value);
        }
        for device in self.devices.iter_mut() {
            device.readz(address, &mut value);
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.readz(address as u32, &mut value);
        }
        value
    }

    fn write_all(&mut self, address: u16, data: u8) {
        if let Some(groms) = self.groms.as_mut() {
            groms.write(address, data);
        }
        for device in self.devices.iter_mut() {
            device.write(address, data);
        }
        if let Some(peribox) = self.peribox.as_mut() {
            peribox.write(address as u32, data);
        }
    }
}

impl Relink for Datamux {
    fn relink(&mut self, previous: &mut Self) {
        self.devices = std::mem::take(&mut previous.devices);
        if let (Some(peribox), Some(old)) = (self.peribox.as_mut(), previous.peribox.as_mut()) {
            peribox.relink(old);
        }
    }
}
