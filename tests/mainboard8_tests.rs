use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use ti99bus::{
    cru::CruAddress,
    grom::GROM_SIZE,
    mainboard8::{Mainboard8, Mainboard8Builder, ROM0_SIZE, ROM1_SIZE},
    oso::{STATUS_HEXBUS_ACTIVE, STATUS_TRANSMIT_BUSY},
    slot::{CardLines, PeripheralCard},
    ti32k::Memory32kCard,
    vaquerro::{GROM_WAIT_CYCLES, VIDEO_WAIT_CYCLES},
    ByteDevice, LineState, SaveState,
};
use tracing_subscriber::fmt;

#[ctor::ctor]
fn init() {
    let subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");
}

type Log = Rc<RefCell<Vec<(u16, u8)>>>;

/// Records every access it sees and answers reads with a fixed byte.
#[derive(Debug)]
struct RecordingDevice {
    name: &'static str,
    answer: u8,
    log: Log,
}

impl RecordingDevice {
    fn boxed(name: &'static str, answer: u8) -> (Box<Self>, Log) {
        let log = Log::default();
        let device = Box::new(Self {
            name,
            answer,
            log: log.clone(),
        });
        (device, log)
    }
}

impl ByteDevice for RecordingDevice {
    fn name(&self) -> &str {
        self.name
    }

    fn readz(&mut self, _offset: u16, value: &mut u8) {
        *value = self.answer;
    }

    fn write(&mut self, offset: u16, data: u8) {
        self.log.borrow_mut().push((offset, data));
    }
}

/// Sound chip stand-in: busy for five cycles after each write.
#[derive(Debug, Default)]
struct SlowSound {
    busy: u8,
}

impl ByteDevice for SlowSound {
    fn name(&self) -> &str {
        "slow sound"
    }

    fn readz(&mut self, _offset: u16, _value: &mut u8) {}

    fn write(&mut self, _offset: u16, _data: u8) {
        self.busy = 5;
    }

    fn clock_in(&mut self, state: LineState) {
        if state.is_asserted() && self.busy > 0 {
            self.busy -= 1;
        }
    }

    fn ready(&self) -> LineState {
        LineState::from(self.busy == 0)
    }
}

/// Speech synthesizer stand-in with an externally controlled READY.
#[derive(Debug)]
struct Speech {
    ready: Rc<Cell<bool>>,
}

impl ByteDevice for Speech {
    fn name(&self) -> &str {
        "speech"
    }

    fn readz(&mut self, _offset: u16, value: &mut u8) {
        *value = 0x60;
    }

    fn write(&mut self, _offset: u16, _data: u8) {}

    fn ready(&self) -> LineState {
        LineState::from(self.ready.get())
    }
}

/// Card whose CRU bit 0 raises INTA and bit 1 holds READY low.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HoldCard {
    #[serde(skip)]
    lines: CardLines,
}

#[typetag::serde]
impl PeripheralCard for HoldCard {
    fn name(&self) -> &str {
        "hold card"
    }

    fn attach(&mut self, lines: CardLines) {
        self.lines = lines;
    }

    fn readz(&mut self, _offset: u32, _value: &mut u8) {}

    fn write(&mut self, _offset: u32, _data: u8) {}

    fn cruwrite(&mut self, offset: CruAddress, data: u8) {
        if !offset.in_page(0x1000) {
            return;
        }
        match offset.bit_in_page() {
            0 => self.lines.set_inta(LineState::from(data != 0)),
            1 => self.lines.set_ready(LineState::from(data == 0)),
            _ => {}
        }
    }
}

fn images() -> (Vec<u8>, Vec<u8>) {
    let mut rom0 = vec![0; ROM0_SIZE];
    rom0[0] = 0x83;
    rom0[1] = 0x00;
    let mut rom1 = vec![0; ROM1_SIZE];
    rom1[0x0000] = 0x10;
    rom1[0x2000] = 0x11;
    rom1[0x4000] = 0x12;
    rom1[0x6000] = 0x13;
    (rom0, rom1)
}

/// Writes `registers` into map 0 of the SRAM and loads it.
fn load_map(board: &mut Mainboard8, registers: &[(usize, u32)]) {
    for &(register, value) in registers {
        for (index, byte) in value.to_be_bytes().into_iter().enumerate() {
            let offset = 0x8000 + (register * 4 + index) as u16;
            board.write_byte(offset, byte, 10).expect("SRAM answers");
        }
    }

    board.set_address(0x8810, LineState::Clear);
    board.write(0x01);
    assert_eq!(board.hold(), LineState::Assert);
    board.holda_in(LineState::Assert);
    board.tick(64);
    board.holda_in(LineState::Clear);
    assert_eq!(board.hold(), LineState::Clear);
}

#[test]
fn test_video_wait_states() {
    let (rom0, rom1) = images();
    let (video, log) = RecordingDevice::boxed("video", 0x77);
    let mut board = Mainboard8Builder::new()
        .rom0(&rom0)
        .rom1(&rom1)
        .video(video)
        .build()
        .expect("valid configuration");

    board.set_address(0x8800, LineState::Assert);
    assert!(!board.is_ready());
    assert_eq!(
        board.run_until_ready(100),
        Some(VIDEO_WAIT_CYCLES as u64)
    );
    assert_eq!(board.read(), 0x77);
    assert!(!board.vaquerro().video_generator().is_generating());

    // Writes are latched until the wait states are over
    board.set_address(0x8C02, LineState::Clear);
    board.write(0x55);
    assert!(board.is_write_pending());
    assert!(log.borrow().is_empty());
    assert_eq!(
        board.run_until_ready(100),
        Some(VIDEO_WAIT_CYCLES as u64)
    );
    assert!(!board.is_write_pending());
    assert_eq!(*log.borrow(), vec![(0x8C02, 0x55)]);
}

#[test]
fn test_native_video_port() {
    let (video, log) = RecordingDevice::boxed("video", 0x21);
    let mut board = Mainboard8Builder::new()
        .crus(false)
        .video(video)
        .build()
        .expect("valid configuration");

    assert_eq!(board.read_byte(0xF822, 100), Some(0x21));
    assert!(board.write_byte(0xF830, 0x42, 100).is_some());
    assert_eq!(*log.borrow(), vec![(0x8C00, 0x42)]);
}

#[test]
fn test_sound_ready_joins() {
    let mut board = Mainboard8Builder::new()
        .sound(Box::new(SlowSound::default()))
        .build()
        .expect("valid configuration");

    assert_eq!(board.write_byte(0x8400, 0x9F, 20), Some(5));
    assert_eq!(board.read_byte(0x0000, 0), Some(0x00));
}

#[test]
fn test_speech_holds_ready() {
    let ready = Rc::new(Cell::new(true));
    let mut board = Mainboard8Builder::new()
        .speech(Box::new(Speech {
            ready: ready.clone(),
        }))
        .build()
        .expect("valid configuration");

    assert_eq!(board.read_byte(0x9000, 0), Some(0x60));

    ready.set(false);
    assert_eq!(board.read_byte(0x9000, 10), None);
    ready.set(true);
    assert_eq!(board.run_until_ready(1), Some(1));
    assert_eq!(board.read(), 0x60);
}

#[test]
fn test_grom_libraries() {
    let mut p3 = vec![0; GROM_SIZE];
    p3[0x0000] = 0xBB;
    p3[0x0001] = 0xBC;

    let mut board = Mainboard8Builder::new()
        .grom_library(3, &p3)
        .build()
        .expect("valid configuration");

    // Library 3 address port: 0x9C0E, data port: 0x980C
    board.write_byte(0x9C0E, 0x00, 100).expect("GROM answers");
    board.write_byte(0x9C0E, 0x00, 100).expect("GROM answers");
    assert_eq!(board.grom_library(3).map(|groms| groms.address()), Some(1));
    assert_eq!(board.grom_library(0).map(|groms| groms.address()), Some(0));

    assert_eq!(board.read_byte(0x980C, 100), Some(0xBB));
    assert_eq!(board.read_byte(0x980C, 100), Some(0xBC));
    assert_eq!(board.vaquerro().gromcs_out(), 0);
    assert!(!board.vaquerro().generator(3).map_or(true, |g| g.is_counting()));
}

#[test]
fn test_consecutive_grom_cycles_wait() {
    let mut grom = vec![0; GROM_SIZE];
    grom[0x1000] = 0x11;
    grom[0x1001] = 0x22;

    let mut board = Mainboard8Builder::new()
        .grom_library(0, &grom)
        .build()
        .expect("valid configuration");

    for byte in [0x10, 0x00] {
        let waited = board.write_byte(0x9C02, byte, 100).expect("GROM answers");
        assert!(waited >= GROM_WAIT_CYCLES as u64);
    }
    assert_eq!(board.grom_library(0).map(|groms| groms.address()), Some(0x1001));

    for expected in [0x11, 0x22] {
        board.set_address(0x9800, LineState::Assert);
        assert!(!board.is_ready());
        let waited = board.run_until_ready(100).expect("GROM answers");
        assert!(waited >= GROM_WAIT_CYCLES as u64);
        assert_eq!(board.read(), expected);
    }
}

#[test]
fn test_grom_libraries_need_crugl() {
    let mut p3 = vec![0; GROM_SIZE];
    p3[0x0000] = 0xBB;

    let mut board = Mainboard8Builder::new()
        .crugl(false)
        .grom_library(3, &p3)
        .build()
        .expect("valid configuration");

    // No select, no wait states
    assert_eq!(board.write_byte(0x9C0E, 0x00, 0), Some(0));
    assert_eq!(board.read_byte(0x980C, 0), Some(0x00));
    assert_eq!(board.grom_library(3).map(|groms| groms.address()), Some(0));
}

#[test]
fn test_mapped_memory() {
    let (rom0, rom1) = images();
    let (cartridge, _) = RecordingDevice::boxed("cartridge", 0xC4);
    let mut board = Mainboard8Builder::new()
        .rom0(&rom0)
        .rom1(&rom1)
        .dram_size(0x20000)
        .cartridge(cartridge)
        .build()
        .expect("valid configuration");

    load_map(
        &mut board,
        &[
            (0x2, 0x0001_0000),
            (0x3, 0x4000_3000),
            (0x6, 0x00FF_6000),
            (0x7, 0x00FF_0000),
            (0xB, 0x00F0_0000),
        ],
    );
    assert_eq!(board.amigo().base_registers()[2], 0x0001_0000);

    board.write_byte(0x2010, 0x66, 10).expect("DRAM answers");
    assert_eq!(board.physical_address(), 0x01_0010);
    assert_eq!(board.dram()[0x1_0010], 0x66);

    // Protected page: the write is refused and flagged
    board.write_byte(0x3010, 0x11, 10).expect("DRAM answers");
    assert_eq!(board.dram()[0x3010], 0x00);
    assert_eq!(board.read_byte(0x8810, 10), Some(1));
    assert_eq!(board.read_byte(0x8810, 10), Some(0));

    assert_eq!(board.read_byte(0x6000, 10), Some(0xC4));
    assert!(board.mofetta().cmas_out());

    // ROM1 low banks, selected by address bit 13
    assert_eq!(board.read_byte(0x7000, 10), Some(0x10));
    load_map(&mut board, &[(0x7, 0x00FF_2000)]);
    assert_eq!(board.read_byte(0x7000, 10), Some(0x11));

    // Pascal ROM is empty in this board
    load_map(&mut board, &[(0xB, 0x00F0_0000)]);
    assert_eq!(board.read_byte(0xB000, 10), Some(0x00));
    assert!(board.mofetta().prcs_out());
}

#[test]
fn test_map_save() {
    let mut board = Mainboard8Builder::new()
        .build()
        .expect("valid configuration");
    load_map(&mut board, &[(0x2, 0x0001_2345)]);

    // Save into map 5
    board.set_address(0x8810, LineState::Clear);
    board.write(0x0A);
    board.holda_in(LineState::Assert);
    board.tick(64);
    board.holda_in(LineState::Clear);

    assert_eq!(&board.sram()[5 * 64 + 8..5 * 64 + 12], &[0x00, 0x01, 0x23, 0x45]);
    assert!(board.is_ready());
}

#[test]
fn test_dsr_pages() {
    let (rom0, rom1) = images();
    let mut board = Mainboard8Builder::new()
        .rom0(&rom0)
        .rom1(&rom1)
        .build()
        .expect("valid configuration");
    load_map(&mut board, &[(0x4, 0x00FF_4000)]);

    assert_eq!(board.read_byte(0x4000, 10), Some(0x00));
    assert!(board.mofetta().dbc_out());

    board.cru_write(CruAddress::new(0x1700), 1);
    assert!(board.mofetta().intdsr_enabled());
    assert_eq!(board.read_byte(0x4000, 10), Some(0x12));

    board.cru_write(CruAddress::new(0x1700), 0);
    board.cru_write(CruAddress::new(0x2700), 1);
    assert_eq!(board.read_byte(0x4000, 10), Some(0x13));
}

#[test]
fn test_box_behind_physical_space() {
    let mut board = Mainboard8Builder::new()
        .card(2, Box::new(Memory32kCard::new()))
        .card(4, Box::new(HoldCard::default()))
        .build()
        .expect("valid configuration");
    load_map(&mut board, &[(0xA, 0x00FF_A000)]);

    board.write_byte(0xA010, 0x3C, 10).expect("box answers");
    assert_eq!(board.read_byte(0xA010, 10), Some(0x3C));
    assert_eq!(board.physical_address(), 0xFF_A010);

    board.cru_write(CruAddress::new(0x1000), 1);
    assert_eq!(board.extint(), LineState::Assert);

    board.cru_write(CruAddress::new(0x1002), 1);
    assert_eq!(board.read_byte(0x0000, 10), None);
    board.cru_write(CruAddress::new(0x1002), 0);
    assert!(board.is_ready());
}

#[test]
fn test_oso_transmits_nibbles() {
    let mut board = Mainboard8Builder::new()
        .crus(false)
        .build()
        .expect("valid configuration");

    board.write_byte(0xF880, 0xA5, 10).expect("Oso answers");
    assert_eq!(
        board.read_byte(0xF882, 10),
        Some(STATUS_TRANSMIT_BUSY | STATUS_HEXBUS_ACTIVE)
    );

    board.tick(16);
    assert_eq!(board.oso_mut().take_hexbus(), vec![0x5, 0xA]);
    assert_eq!(board.read_byte(0xF882, 10), Some(0));

    board.oso_mut().hexbus_value_changed(0x4E);
    assert_eq!(board.read_byte(0xF880, 10), Some(0x4E));
}

#[test]
fn test_save_state_round_trip() {
    let (rom0, rom1) = images();
    let (video, log) = RecordingDevice::boxed("video", 0x77);
    let mut board = Mainboard8Builder::new()
        .rom0(&rom0)
        .rom1(&rom1)
        .video(video)
        .card(4, Box::new(HoldCard::default()))
        .build()
        .expect("valid configuration");
    load_map(&mut board, &[(0x2, 0x0000_8000)]);

    board.write_byte(0x8100, 0x01, 10).expect("SRAM answers");
    board.write_byte(0x2000, 0x02, 10).expect("DRAM answers");
    let saved = board.save_state().expect("serializable");

    board.write_byte(0x8100, 0x03, 10).expect("SRAM answers");
    board.write_byte(0x2000, 0x04, 10).expect("DRAM answers");
    load_map(&mut board, &[(0x2, 0x0000_0000)]);
    board.load_state(&saved).expect("valid state");

    assert_eq!(board.amigo().base_registers()[2], 0x0000_8000);
    assert_eq!(board.read_byte(0x8100, 10), Some(0x01));
    assert_eq!(board.read_byte(0x2000, 10), Some(0x02));
    assert_eq!(board.dram()[0x8000], 0x02);

    // Devices and box lines are carried over
    assert!(board.write_byte(0x8C00, 0x99, 100).is_some());
    assert_eq!(log.borrow().last().copied(), Some((0x8C00, 0x99)));
    board.cru_write(CruAddress::new(0x1000), 1);
    assert_eq!(board.extint(), LineState::Assert);
}
