use serde::{Deserialize, Serialize};

use crate::signal::LineState;

/// Clock cycles a GROM access is held before the select reaches the GROMs.
pub const GROM_WAIT_CYCLES: u8 = 3;

/// Clock cycles of a video access.
pub const VIDEO_WAIT_CYCLES: u8 = 15;

/// Number of GROM libraries decoded by Vaquerro.
pub const GROM_LIBRARIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitKind {
    /// Followed by the SRY gate: after counting, READY follows the GROM.
    Grom,
    Video,
}

impl WaitKind {
    pub fn wait_cycles(self) -> u8 {
        match self {
            WaitKind::Grom => GROM_WAIT_CYCLES,
            WaitKind::Video => VIDEO_WAIT_CYCLES,
        }
    }
}

/// Wait state generator: two flip-flops and a counter.
///
/// Selecting the generator starts the counter, which advances on every
/// rising clock edge. While counting, READY is held low. When the counter
/// reaches its terminal value the generator starts generating the select
/// for the device; a GROM generator then passes on the READY of the GROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStateGenerator {
    kind: WaitKind,
    counting: bool,
    generate: bool,
    counter: u8,
    selvalue: u8,
    addressed: bool,
    ready: bool,
}

impl WaitStateGenerator {
    pub fn new(kind: WaitKind, selvalue: u8) -> Self {
        Self {
            kind,
            counting: false,
            generate: false,
            counter: 0,
            selvalue,
            addressed: false,
            ready: true,
        }
    }

    pub fn kind(&self) -> WaitKind {
        self.kind
    }

    pub fn select_in(&mut self, addressed: bool) {
        if addressed && !self.addressed {
            self.counting = true;
            self.generate = false;
            self.counter = 0;
        } else if !addressed {
            self.counting = false;
            self.generate = false;
            self.counter = 0;
        }
        self.addressed = addressed;
    }

    /// READY of the GROM behind this generator. Video generators have no
    /// SRY gate and ignore it.
    pub fn ready_in(&mut self, ready: LineState) {
        if self.kind == WaitKind::Grom {
            self.ready = ready.is_asserted();
        }
    }

    pub fn clock_in(&mut self, clkout: LineState) {
        if clkout.is_clear() || !self.counting {
            return;
        }

        self.counter += 1;
        if self.counter >= self.kind.wait_cycles() {
            self.counting = false;
            self.generate = true;
        }
    }

    /// Terminates the wait states regardless of the count. The next
    /// select starts a new count.
    pub fn treset_in(&mut self, reset: LineState) {
        if reset.is_asserted() {
            self.counting = false;
            self.generate = false;
            self.counter = 0;
            self.addressed = false;
        }
    }

    /// Select value while generating, 0 otherwise.
    pub fn select_out(&self) -> u8 {
        if self.addressed && self.generate {
            self.selvalue
        } else {
            0
        }
    }

    pub fn ready_out(&self) -> LineState {
        (!self.counting && (!self.generate || self.ready)).into()
    }

    pub fn is_counting(&self) -> bool {
        self.counting
    }

    pub fn is_generating(&self) -> bool {
        self.generate
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }
}

/// Logical address space arbiter of the TI-99/8.
///
/// Decides whether an address belongs to the logical space (ROM0, SRAM and
/// the memory mapped devices) and decodes the chip selects. With CRUS
/// asserted the devices sit at the TI-99/4A addresses (0x8000-0x9FFF),
/// otherwise in the native window at 0xF000-0xF88F.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vaquerro {
    memen: bool,
    crus: bool,
    crugl: bool,
    lasreq: bool,
    grom_or_video: bool,
    sromcs: bool,
    sccs: bool,
    sndcs: bool,
    mapcs: bool,
    vdprd: bool,
    vdpwt: bool,
    sprd: bool,
    spwt: bool,
    oso: bool,
    gromsel: u8,
    a14: bool,
    dbin: LineState,
    grom_generators: [WaitStateGenerator; GROM_LIBRARIES],
    video_generator: WaitStateGenerator,
}

impl Default for Vaquerro {
    fn default() -> Self {
        Self::new()
    }
}

impl Vaquerro {
    pub fn new() -> Self {
        Self {
            memen: false,
            crus: true,
            crugl: true,
            lasreq: false,
            grom_or_video: false,
            sromcs: false,
            sccs: false,
            sndcs: false,
            mapcs: false,
            vdprd: false,
            vdpwt: false,
            sprd: false,
            spwt: false,
            oso: false,
            gromsel: 0,
            a14: false,
            dbin: LineState::Clear,
            grom_generators: [
                WaitStateGenerator::new(WaitKind::Grom, 1),
                WaitStateGenerator::new(WaitKind::Grom, 2),
                WaitStateGenerator::new(WaitKind::Grom, 4),
                WaitStateGenerator::new(WaitKind::Grom, 8),
            ],
            video_generator: WaitStateGenerator::new(WaitKind::Video, 1),
        }
    }

    pub fn crus_in(&mut self, state: LineState) {
        tracing::debug!("[VAQUERRO] CRUS = {}", state);
        self.crus = state.is_asserted();
    }

    pub fn crugl_in(&mut self, state: LineState) {
        tracing::debug!("[VAQUERRO] CRUGL = {}", state);
        self.crugl = state.is_asserted();
    }

    pub fn memen_in(&mut self, state: LineState) {
        self.memen = state.is_asserted();
    }

    pub fn crus(&self) -> bool {
        self.crus
    }

    /// Decodes the logical address of the current cycle.
    pub fn set_address(&mut self, offset: u16, dbin: LineState) {
        self.a14 = offset & 2 != 0;
        self.dbin = dbin;
        self.clear_selects();

        let reading = dbin.is_asserted();
        let rom0 = offset & 0xE000 == 0x0000;
        let window = if self.crus {
            offset & 0xE000 == 0x8000
        } else {
            offset & 0xF000 == 0xF000 && offset <= 0xF88F
        };
        self.lasreq = self.memen && (rom0 || window);

        let mut grom = None;
        if self.lasreq {
            if rom0 {
                self.sromcs = true;
            } else if self.crus {
                match offset & 0xFC00 {
                    0x8000 => self.sccs = true,
                    0x8400 => self.sndcs = true,
                    0x8800 => match offset & 0xFFF0 {
                        0x8800 => self.vdprd = reading,
                        0x8810 => self.mapcs = true,
                        _ => {}
                    },
                    0x8C00 => self.vdpwt = !reading,
                    0x9000 => self.sprd = reading,
                    0x9400 => self.spwt = !reading,
                    0x9800 if reading => grom = Some(offset),
                    0x9C00 if !reading => grom = Some(offset),
                    _ => {}
                }
            } else if offset & 0xF800 == 0xF000 {
                self.sccs = true;
            } else {
                match offset & 0xFFF0 {
                    0xF800 => self.sndcs = true,
                    0xF810 => self.mapcs = true,
                    0xF820 => self.vdprd = reading,
                    0xF830 => self.vdpwt = !reading,
                    0xF840 => self.sprd = reading,
                    0xF850 => self.spwt = !reading,
                    0xF860 if reading => grom = Some(offset),
                    0xF870 if !reading => grom = Some(offset),
                    0xF880 => self.oso = true,
                    _ => {}
                }
            }
        }

        if let Some(offset) = grom {
            let library = ((offset >> 2) & 3) as usize;
            if library == 0 || self.crugl {
                self.gromsel = 1 << library;
            } else {
                tracing::trace!("[VAQUERRO] GROM library {} disabled", library);
            }
        }

        self.grom_or_video = self.gromsel != 0 || self.vdprd || self.vdpwt;
        for (library, generator) in self.grom_generators.iter_mut().enumerate() {
            generator.select_in(self.gromsel & (1 << library) != 0);
        }
        self.video_generator.select_in(self.vdprd || self.vdpwt);

        tracing::trace!(
            "[VAQUERRO] {:04X} lasreq={} gromsel={:X}",
            offset,
            self.lasreq,
            self.gromsel
        );
    }

    pub fn clock_in(&mut self, state: LineState) {
        for generator in self.grom_generators.iter_mut() {
            generator.clock_in(state);
        }
        self.video_generator.clock_in(state);
    }

    /// READY of GROM library `library` (SRY gate input).
    pub fn grom_ready_in(&mut self, library: usize, state: LineState) {
        if let Some(generator) = self.grom_generators.get_mut(library) {
            generator.ready_in(state);
        }
    }

    /// Ends the wait states of the current cycle.
    pub fn treset(&mut self) {
        for generator in self.grom_generators.iter_mut() {
            generator.treset_in(LineState::Assert);
        }
        self.video_generator.treset_in(LineState::Assert);
    }

    /// Combined READY of the wait state generators (GGRDY).
    pub fn ready(&self) -> LineState {
        if !self.grom_or_video {
            return LineState::Assert;
        }
        let ready = self
            .grom_generators
            .iter()
            .chain(std::iter::once(&self.video_generator))
            .all(|generator| generator.ready_out().is_asserted());
        ready.into()
    }

    /// Collective GROM select, one bit per library.
    pub fn gromcs_out(&self) -> u8 {
        self.grom_generators
            .iter()
            .fold(0, |select, generator| select | generator.select_out())
    }

    pub fn generator(&self, library: usize) -> Option<&WaitStateGenerator> {
        self.grom_generators.get(library)
    }

    pub fn video_generator(&self) -> &WaitStateGenerator {
        &self.video_generator
    }

    pub fn a14(&self) -> bool {
        self.a14
    }

    pub fn lascsq_out(&self) -> LineState {
        self.lasreq.into()
    }

    pub fn sromcs_out(&self) -> bool {
        self.sromcs
    }

    pub fn sccs_out(&self) -> bool {
        self.sccs
    }

    pub fn sndcs_out(&self) -> bool {
        self.sndcs
    }

    pub fn mapcs_out(&self) -> bool {
        self.mapcs
    }

    pub fn vdprd_out(&self) -> bool {
        self.vdprd
    }

    pub fn vdpwt_out(&self) -> bool {
        self.vdpwt
    }

    pub fn sprd_out(&self) -> bool {
        self.sprd
    }

    pub fn spwt_out(&self) -> bool {
        self.spwt
    }

    pub fn oso_out(&self) -> bool {
        self.oso
    }

    pub fn reset(&mut self) {
        self.memen = false;
        self.lasreq = false;
        self.clear_selects();
        for generator in self.grom_generators.iter_mut() {
            generator.select_in(false);
            generator.ready_in(LineState::Assert);
        }
        self.video_generator.select_in(false);
    }

    fn clear_selects(&mut self) {
        self.grom_or_video = false;
        self.sromcs = false;
        self.sccs = false;
        self.sndcs = false;
        self.mapcs = false;
        self.vdprd = false;
        self.vdpwt = false;
        self.sprd = false;
        self.spwt = false;
        self.oso = false;
        self.gromsel = 0;
    }
}
