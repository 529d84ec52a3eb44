use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, ClockEvent},
    config::MachineConfig,
    cru::CruAddress,
    datamux::Datamux,
    device::ByteDevice,
    error::ConfigError,
    grom::{GromLibrary, GromPort, GROM_SIZE},
    peribox::{IoportLines, PeripheralBox, PeriboxVariant},
    signal::{LineState, WiredAnd},
    slot::PeripheralCard,
    state::Relink,
};

/// Number of GROMs inside the console.
pub const CONSOLE_GROM_CHIPS: u8 = 3;

/// CPU cycles the reset line stays asserted after `Machine::reset`.
pub const RESET_CYCLES: u64 = 8;

/// Contributors to the console READY line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySource {
    Grom = 0,
    Datamux = 1,
    Devices = 2,
}

/// Line changes arriving from the I/O port, drained by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    ExtInt(LineState),
    IoportReady(LineState),
}

/// TI-99/4A console bus: the datamux with its 8-bit devices, the expansion
/// box on the I/O port and the READY join seen by the CPU.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Machine {
    datamux: Datamux,
    clock: Clock,
    ready: WiredAnd,
    extint: LineState,
    reset_line: LineState,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    queue: Rc<RefCell<VecDeque<Message>>>,
}

impl Machine {
    fn new(mut datamux: Datamux, clock: Clock) -> Self {
        let queue = Rc::new(RefCell::new(VecDeque::new()));

        if let Some(peribox) = datamux.peribox_mut() {
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
        }

        let mut machine = Self {
            datamux,
            clock,
            ready: WiredAnd::new(),
            extint: LineState::Clear,
            reset_line: LineState::Clear,
            queue,
        };
        machine.settle();
        machine
    }

    pub fn datamux(&self) -> &Datamux {
        &self.datamux
    }

    pub fn datamux_mut(&mut self) -> &mut Datamux {
        &mut self.datamux
    }

    pub fn peribox(&self) -> Option<&PeripheralBox> {
        self.datamux.peribox()
    }

    pub fn peribox_mut(&mut self) -> Option<&mut PeripheralBox> {
        self.datamux.peribox_mut()
    }

    pub fn total_cycles(&self) -> u64 {
        self.clock.total_cycles()
    }

    /// Starts a memory cycle.
    pub fn set_address(&mut self, address: u16, dbin: LineState) {
        self.datamux.set_address(address, dbin);
        self.settle();
    }

    /// Completes a read cycle. Call once READY is asserted.
    pub fn read(&mut self) -> u16 {
        let value = self.datamux.read();
        self.settle();
        value
    }

    pub fn write(&mut self, data: u16) {
        self.datamux.write(data);
        self.settle();
    }

    /// CRU input bit. Bits nobody answers read as 0.
    pub fn cru_read(&mut self, offset: CruAddress) -> u8 {
        let mut value = 0;
        if let Some(peribox) = self.datamux.peribox_mut() {
            peribox.crureadz(offset, &mut value);
        }
        self.settle();
        value
    }

    pub fn cru_write(&mut self, offset: CruAddress, data: u8) {
        tracing::trace!("[TI99] {} <- {}", offset, data);
        if let Some(peribox) = self.datamux.peribox_mut() {
            peribox.cruwrite(offset, data);
        }
        self.settle();
    }

    /// Runs the bus for `cycles` CPU cycles.
    pub fn tick(&mut self, cycles: u32) {
        let events = self.clock.tick(cycles);
        for event in events {
            match event {
                ClockEvent::ClockOut(state) => self.datamux.clock_in(state),
                ClockEvent::GromClock(state) => self.datamux.gromclk_in(state),
                ClockEvent::ResetRelease => {
                    tracing::debug!("[TI99] Reset released");
                    self.reset_line = LineState::Clear;
                }
            }
            self.settle();
        }
    }

    /// READY as seen by the CPU.
    pub fn ready(&self) -> LineState {
        (!self.ready.is_pulled()).into()
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
                tracing::warn!("[TI99] READY still low after {} cycles", cycles);
                return None;
            }
            self.tick(1);
            cycles += 1;
        }
        Some(cycles)
    }

    /// Complete read cycle including the wait states.
    pub fn read_word(&mut self, address: u16, max_cycles: u64) -> Option<u16> {
        self.set_address(address, LineState::Assert);
        self.run_until_ready(max_cycles)?;
        Some(self.read())
    }

    /// Complete write cycle; returns the wait states spent.
    pub fn write_word(&mut self, address: u16, data: u16, max_cycles: u64) -> Option<u64> {
        self.set_address(address, LineState::Clear);
        self.write(data);
        self.run_until_ready(max_cycles)
    }

    /// Interrupt request from the box (INTA over the I/O port).
    pub fn extint(&self) -> LineState {
        self.extint
    }

    /// Asserted while the CPU is held in reset.
    pub fn reset_line(&self) -> LineState {
        self.reset_line
    }

    pub fn reset(&mut self) {
        tracing::info!("[TI99] Reset");
        self.clock.reset();
        self.datamux.reset();
        self.ready.clear();
        self.extint = LineState::Clear;
        self.reset_line = LineState::Assert;
        self.clock.schedule(RESET_CYCLES, ClockEvent::ResetRelease);
        self.settle();
    }

    /// Drains the I/O port messages and recomputes the READY join.
    fn settle(&mut self) {
        while let Some(message) = self.queue.borrow_mut().pop_front() {
            match message {
                Message::ExtInt(state) => {
                    if state != self.extint {
                        tracing::debug!("[TI99] EXTINT {}", state);
                    }
                    self.extint = state;
                }
                Message::IoportReady(state) => self.datamux.ready_in(state),
            }
        }

        self.ready
            .join_ready(ReadySource::Grom as usize, self.datamux.grom_ready());
        self.ready
            .join_ready(ReadySource::Datamux as usize, self.datamux.ready_line());
        self.ready
            .join_ready(ReadySource::Devices as usize, self.datamux.devices_ready());
    }
}

impl Relink for Machine {
    fn relink(&mut self, previous: &mut Self) {
        self.queue = previous.queue.clone();
        self.datamux.relink(&mut previous.datamux);
    }
}

#[derive(Default)]
pub struct MachineBuilder {
    config: MachineConfig,
    rom: Vec<u8>,
    grom: Vec<u8>,
    cards: Vec<(usize, Box<dyn PeripheralCard>)>,
    devices: Vec<Box<dyn ByteDevice>>,
}

impl MachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: MachineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn system_rom(&mut self, data: &[u8]) -> &mut Self {
        self.rom = data.to_vec();
        self
    }

    pub fn system_grom(&mut self, data: &[u8]) -> &mut Self {
        self.grom = data.to_vec();
        self
    }

    pub fn use32k(&mut self, enabled: bool) -> &mut Self {
        self.config.use32k = enabled;
        self
    }

    pub fn wait_states(&mut self, wait_states: u8) -> &mut Self {
        self.config.wait_states = wait_states;
        self
    }

    pub fn gromclk_divider(&mut self, divider: u32) -> &mut Self {
        self.config.gromclk_divider = divider;
        self
    }

    pub fn peribox(&mut self, variant: Option<PeriboxVariant>) -> &mut Self {
        self.config.peribox = variant;
        self
    }

    pub fn genmod(&mut self, enabled: bool) -> &mut Self {
        self.config.genmod = enabled;
        self
    }

    pub fn card(&mut self, slot: usize, card: Box<dyn PeripheralCard>) -> &mut Self {
        self.cards.push((slot, card));
        self
    }

    /// Adds an 8-bit console device (sound, video, speech, cartridge).
    pub fn device(&mut self, device: Box<dyn ByteDevice>) -> &mut Self {
        self.devices.push(device);
        self
    }

    /// Builds the console. Cards and devices are moved into the machine,
    /// so the builder is left without them.
    pub fn build(&mut self) -> Result<Machine, ConfigError> {
        self.config.validate()?;

        let max = CONSOLE_GROM_CHIPS as usize * GROM_SIZE;
        if self.grom.len() > max {
            return Err(ConfigError::ImageTooLarge {
                name: "Console GROM",
                size: self.grom.len(),
                max,
            });
        }

        let mut datamux = Datamux::new(&self.rom, self.config.use32k, self.config.wait_states)?;
        datamux.attach_groms(GromPort::console(GromLibrary::with_contents(
            "console",
            CONSOLE_GROM_CHIPS,
            &self.grom,
        )));

        if let Some(variant) = self.config.peribox {
            let mut peribox = PeripheralBox::new(variant);
            peribox.set_genmod(self.config.genmod);
            for (slot, card) in self.cards.drain(..) {
                peribox.insert(slot, card)?;
            }
            datamux.attach_peribox(peribox);
        } else if !self.cards.is_empty() {
            tracing::warn!(
                "[TI99] No expansion box configured, ignoring {} cards",
                self.cards.len()
            );
            self.cards.clear();
        }

        for device in self.devices.drain(..) {
            datamux.add_device(device);
        }

        Ok(Machine::new(
            datamux,
            Clock::new(self.config.gromclk_divider),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ti32k::Memory32kCard;

    #[test]
    fn test_grom_read_needs_gromclk() {
        let mut grom = vec![0; GROM_SIZE];
        grom[0] = 0xAA;
        let mut machine = MachineBuilder::new()
            .system_grom(&grom)
            .peribox(None)
            .build()
            .expect("valid configuration");

        assert!(machine.is_ready());
        // GROM address 0x0000, one byte per write
        machine.write_word(0x9C02, 0x0000, 100).expect("GROM answers");
        machine.write_word(0x9C02, 0x0000, 100).expect("GROM answers");

        machine.set_address(0x9800, LineState::Assert);
        assert!(!machine.is_ready());
        let waited = machine.run_until_ready(100).expect("GROM answers");
        assert!(waited > 2);
        assert_eq!(machine.read() >> 8, 0x00AA);
    }

    #[test]
    fn test_memory_expansion_through_box() {
        let mut machine = MachineBuilder::new()
            .card(3, Box::new(Memory32kCard::new()))
            .build()
            .expect("valid configuration");

        assert_eq!(machine.write_word(0xA000, 0x1234, 10), Some(2));
        assert_eq!(machine.read_word(0xA000, 10), Some(0x1234));
    }

    #[test]
    fn test_reset_line() {
        let mut machine = MachineBuilder::new().build().expect("valid configuration");
        machine.reset();
        assert_eq!(machine.reset_line(), LineState::Assert);
        machine.tick(RESET_CYCLES as u32);
        assert_eq!(machine.reset_line(), LineState::Clear);
    }

    #[test]
    fn test_cards_need_box_slots() {
        assert_eq!(
            MachineBuilder::new()
                .card(1, Box::new(Memory32kCard::new()))
                .build()
                .err(),
            Some(ConfigError::InvalidSlot(1))
        );
    }
}
