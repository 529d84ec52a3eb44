use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    cru::CruAddress,
    error::ConfigError,
    signal::{LineCallback, LineState, WiredAnd},
    slot::{
        CardLine, CardLines, PeripheralCard, Slot, SlotSignal, FIRST_CARD_SLOT, LAST_CARD_SLOT,
    },
    state::Relink,
};

const SLOT_COUNT: usize = LAST_CARD_SLOT - FIRST_CARD_SLOT + 1;

/// Flavour of the expansion box, fixed at construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriboxVariant {
    /// Box attached to a TI-99/4A or TI-99/8 console.
    #[default]
    Standard,
    /// Box with the EVPC video card in slot 2.
    Evpc,
    /// Box hosting the SGCPU card in slot 1.
    Sgcpu,
    /// Box hosting the Geneve card in slot 1.
    Geneve,
}

impl PeriboxVariant {
    /// AMA/AMB/AMC are tied high by the console interface and by the SGCPU;
    /// the Geneve drives them as part of its own address.
    pub fn address_prefix(self) -> u32 {
        match self {
            PeriboxVariant::Geneve => 0x00000,
            _ => 0x70000,
        }
    }
}

impl fmt::Display for PeriboxVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriboxVariant::Standard => write!(f, "PEB"),
            PeriboxVariant::Evpc => write!(f, "PEB with EVPC"),
            PeriboxVariant::Sgcpu => write!(f, "PEB with SGCPU"),
            PeriboxVariant::Geneve => write!(f, "PEB with Geneve"),
        }
    }
}

/// Console side of the flex cable interface.
#[derive(Default)]
pub struct IoportLines {
    pub extint: Option<LineCallback>,
    pub ready: Option<LineCallback>,
}

/// Host card in slot 1 (SGCPU or Geneve).
#[derive(Default)]
pub struct Slot1Lines {
    pub inta: Option<LineCallback>,
    pub intb: Option<LineCallback>,
    pub lcp: Option<LineCallback>,
    pub ready: Option<LineCallback>,
}

/// Peripheral expansion box.
///
/// Broadcasts every access to the cards in slots 2 to 8 and joins their
/// INTA, INTB, LCP and READY outputs. The joined lines go to the console
/// (flex cable) or, when a host card is wired into slot 1, to that card.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct PeripheralBox {
    variant: PeriboxVariant,
    address_prefix: u32,
    slots: [Option<Slot>; SLOT_COUNT],
    inta: WiredAnd,
    intb: WiredAnd,
    lcp: WiredAnd,
    ready: WiredAnd,
    ioport_connected: bool,
    genmod: bool,
    memen: LineState,
    msast: LineState,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    ioport: IoportLines,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    slot1: Slot1Lines,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    signals: Rc<RefCell<VecDeque<SlotSignal>>>,
}

impl PeripheralBox {
    pub fn new(variant: PeriboxVariant) -> Self {
        tracing::info!("[PEB] Initializing {}", variant);
        Self {
            variant,
            address_prefix: variant.address_prefix(),
            slots: Default::default(),
            inta: WiredAnd::new(),
            intb: WiredAnd::new(),
            lcp: WiredAnd::new(),
            ready: WiredAnd::new(),
            ioport_connected: true,
            genmod: false,
            memen: LineState::Clear,
            msast: LineState::Clear,
            ioport: IoportLines::default(),
            slot1: Slot1Lines::default(),
            signals: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn variant(&self) -> PeriboxVariant {
        self.variant
    }

    pub fn address_prefix(&self) -> u32 {
        self.address_prefix
    }

    /// Wires the flex cable lines towards the console.
    pub fn connect_ioport(&mut self, lines: IoportLines) {
        self.ioport = lines;
    }

    /// Wires the lines towards a host card in slot 1. The box relays to
    /// the console only if no host interrupt line is connected.
    pub fn connect_slot1(&mut self, lines: Slot1Lines) {
        self.ioport_connected = lines.inta.is_none();
        self.slot1 = lines;
        tracing::debug!("[PEB] ioport_connected = {}", self.ioport_connected);
    }

    pub fn is_ioport_connected(&self) -> bool {
        self.ioport_connected
    }

    pub fn insert(&mut self, slot: usize, mut card: Box<dyn PeripheralCard>) -> Result<(), ConfigError> {
        let index = Self::index(slot)?;
        if let Some(existing) = &self.slots[index] {
            return Err(ConfigError::SlotOccupied(slot, existing.card().name().to_string()));
        }

        if !card.supports(self.variant) {
            tracing::warn!(
                "[PEB] {} in slot {} does not work in a {}",
                card.name(),
                slot,
                self.variant
            );
        }

        if self.genmod && !card.supports_genmod() {
            Self::warn_genmod(slot, card.as_ref());
        }

        tracing::info!("[PEB] Slot {}: {}", slot, card.name());
        card.attach(CardLines::new(slot, self.signals.clone()));
        card.set_genmod(self.genmod);
        self.slots[index] = Some(Slot::new(slot, card));
        self.propagate();
        Ok(())
    }

    /// Takes a card out. Whatever lines it was pulling are released.
    pub fn remove(&mut self, slot: usize) -> Result<Option<Box<dyn PeripheralCard>>, ConfigError> {
        let index = Self::index(slot)?;
        let Some(removed) = self.slots[index].take() else {
            return Ok(None);
        };

        self.inta_join(slot, LineState::Clear);
        self.intb_join(slot, LineState::Clear);
        self.lcp_join(slot, LineState::Clear);
        self.ready_join(slot, LineState::Assert);

        let mut card = removed.into_card();
        card.attach(CardLines::default());
        Ok(Some(card))
    }

    pub fn card(&self, slot: usize) -> Option<&dyn PeripheralCard> {
        let index = Self::index(slot).ok()?;
        self.slots[index].as_ref().map(|slot| slot.card())
    }

    pub fn populated_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().flatten().map(|slot| slot.number())
    }

    pub fn readz(&mut self, offset: u32, value: &mut u8) {
        let offset = offset | self.address_prefix;
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().readz(offset, value);
        }
        self.propagate();
    }

    pub fn write(&mut self, offset: u32, data: u8) {
        let offset = offset | self.address_prefix;
        tracing::trace!("[PEB] write {:05X} <- {:02X}", offset, data);
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().write(offset, data);
        }
        self.propagate();
    }

    /// Ignored while MEMEN is cleared; the TI-99/8 puts the high part of
    /// its physical address on the bus that way.
    pub fn setaddress_dbin(&mut self, offset: u32, dbin: LineState) {
        if self.memen.is_clear() {
            return;
        }
        let offset = offset | self.address_prefix;
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().setaddress_dbin(offset, dbin);
        }
        self.propagate();
    }

    pub fn crureadz(&mut self, offset: CruAddress, value: &mut u8) {
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().crureadz(offset, value);
        }
        self.propagate();
    }

    pub fn cruwrite(&mut self, offset: CruAddress, data: u8) {
        tracing::trace!("[PEB] {} <- {}", offset, data);
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().cruwrite(offset, data);
        }
        self.propagate();
    }

    pub fn senila(&mut self, state: LineState) {
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().senila(state);
        }
        self.propagate();
    }

    pub fn senilb(&mut self, state: LineState) {
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().senilb(state);
        }
        self.propagate();
    }

    pub fn clock_in(&mut self, state: LineState) {
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().clock_in(state);
        }
        self.propagate();
    }

    pub fn memen_in(&mut self, state: LineState) {
        self.memen = state;
    }

    pub fn msast_in(&mut self, state: LineState) {
        self.msast = state;
    }

    pub fn set_genmod(&mut self, genmod: bool) {
        tracing::info!("[PEB] Genmod {}", if genmod { "on" } else { "off" });
        let switched_on = genmod && !self.genmod;
        self.genmod = genmod;
        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().set_genmod(genmod);
            if switched_on && !slot.card().supports_genmod() {
                Self::warn_genmod(slot.number(), slot.card());
            }
        }
    }

    pub fn genmod(&self) -> bool {
        self.genmod
    }

    /// Slots holding a card that does not work with the box variant or
    /// with the Genmod setting.
    pub fn incompatible_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| {
                !slot.card().supports(self.variant)
                    || (self.genmod && !slot.card().supports_genmod())
            })
            .map(|slot| slot.number())
    }

    /// Resets the cards and releases every joined line. Lines the cards
    /// pull again while resetting are joined anew.
    pub fn reset(&mut self) {
        self.memen = LineState::Clear;
        self.msast = LineState::Clear;
        self.signals.borrow_mut().clear();
        self.inta.clear();
        self.intb.clear();
        self.lcp.clear();
        self.ready.clear();

        for slot in self.slots.iter_mut().flatten() {
            slot.card_mut().reset();
        }
        self.propagate();

        for line in [CardLine::Inta, CardLine::Intb, CardLine::Lcp, CardLine::Ready] {
            self.emit(line);
        }
    }

    pub fn inta_join(&mut self, slot: usize, state: LineState) {
        self.inta.join_asserted(slot, state);
        self.emit(CardLine::Inta);
    }

    pub fn intb_join(&mut self, slot: usize, state: LineState) {
        self.intb.join_asserted(slot, state);
        self.emit(CardLine::Intb);
    }

    pub fn lcp_join(&mut self, slot: usize, state: LineState) {
        self.lcp.join_asserted(slot, state);
        self.emit(CardLine::Lcp);
    }

    pub fn ready_join(&mut self, slot: usize, state: LineState) {
        self.ready.join_ready(slot, state);
        self.emit(CardLine::Ready);
    }

    pub fn inta(&self) -> LineState {
        self.inta.is_pulled().into()
    }

    pub fn intb(&self) -> LineState {
        self.intb.is_pulled().into()
    }

    pub fn lcp(&self) -> LineState {
        self.lcp.is_pulled().into()
    }

    pub fn ready(&self) -> LineState {
        (!self.ready.is_pulled()).into()
    }

    /// Joins all line changes the cards queued during the last broadcast,
    /// then sends each touched line upwards once.
    fn propagate(&mut self) {
        let signals: Vec<SlotSignal> = self.signals.borrow_mut().drain(..).collect();
        if signals.is_empty() {
            return;
        }

        let mut touched = Vec::with_capacity(4);
        for signal in signals {
            tracing::trace!("[PEB] Slot {} {:?} {}", signal.slot, signal.line, signal.state);
            match signal.line {
                CardLine::Inta => self.inta.join_asserted(signal.slot, signal.state),
                CardLine::Intb => self.intb.join_asserted(signal.slot, signal.state),
                CardLine::Lcp => self.lcp.join_asserted(signal.slot, signal.state),
                CardLine::Ready => self.ready.join_ready(signal.slot, signal.state),
            };
            if !touched.contains(&signal.line) {
                touched.push(signal.line);
            }
        }

        for line in touched {
            self.emit(line);
        }
    }

    fn emit(&mut self, line: CardLine) {
        let state = match line {
            CardLine::Inta => self.inta(),
            CardLine::Intb => self.intb(),
            CardLine::Lcp => self.lcp(),
            CardLine::Ready => self.ready(),
        };

        let callback = if self.ioport_connected {
            match line {
                CardLine::Inta => self.ioport.extint.as_mut(),
                CardLine::Ready => self.ioport.ready.as_mut(),
                CardLine::Intb | CardLine::Lcp => None,
            }
        } else {
            match line {
                CardLine::Inta => self.slot1.inta.as_mut(),
                CardLine::Intb => self.slot1.intb.as_mut(),
                CardLine::Lcp => self.slot1.lcp.as_mut(),
                CardLine::Ready => self.slot1.ready.as_mut(),
            }
        };

        if let Some(callback) = callback {
            callback(state);
        }
    }

    fn warn_genmod(slot: usize, card: &dyn PeripheralCard) {
        tracing::warn!("[PEB] {} in slot {} does not work with Genmod", card.name(), slot);
    }

    fn attach_cards(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            let lines = CardLines::new(slot.number(), self.signals.clone());
            slot.card_mut().attach(lines);
        }
    }

    fn index(slot: usize) -> Result<usize, ConfigError> {
        if (FIRST_CARD_SLOT..=LAST_CARD_SLOT).contains(&slot) {
            Ok(slot - FIRST_CARD_SLOT)
        } else {
            Err(ConfigError::InvalidSlot(slot))
        }
    }
}

impl Relink for PeripheralBox {
    fn relink(&mut self, previous: &mut Self) {
        self.ioport = std::mem::take(&mut previous.ioport);
        self.slot1 = std::mem::take(&mut previous.slot1);
        self.attach_cards();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ti32k::Memory32kCard;

    #[test]
    fn test_empty_box_leaves_value() {
        let mut peb = PeripheralBox::new(PeriboxVariant::Standard);
        peb.memen_in(LineState::Assert);
        peb.setaddress_dbin(0x4000, LineState::Assert);
        let mut value = 0xFF;
        peb.readz(0x4000, &mut value);
        assert_eq!(value, 0xFF);
        assert_eq!(peb.ready(), LineState::Assert);
    }

    #[test]
    fn test_slot_range() {
        let mut peb = PeripheralBox::new(PeriboxVariant::Standard);
        assert_eq!(
            peb.insert(1, Box::new(Memory32kCard::new())),
            Err(ConfigError::InvalidSlot(1))
        );
        assert_eq!(
            peb.insert(9, Box::new(Memory32kCard::new())),
            Err(ConfigError::InvalidSlot(9))
        );
        assert!(peb.insert(8, Box::new(Memory32kCard::new())).is_ok());
        assert!(matches!(
            peb.insert(8, Box::new(Memory32kCard::new())),
            Err(ConfigError::SlotOccupied(8, _))
        ));
        assert_eq!(peb.populated_slots().collect::<Vec<_>>(), vec![8]);
    }

    #[test]
    fn test_prefix_reaches_cards() {
        let mut peb = PeripheralBox::new(PeriboxVariant::Standard);
        peb.insert(3, Box::new(Memory32kCard::new())).expect("free slot");
        peb.write(0xA000, 0x5A);
        let mut value = 0;
        peb.readz(0xA000, &mut value);
        assert_eq!(value, 0x5A);

        // The Geneve box does not add the console prefix.
        let mut geneve = PeripheralBox::new(PeriboxVariant::Geneve);
        geneve.insert(3, Box::new(Memory32kCard::new())).expect("free slot");
        geneve.write(0xA000, 0x5A);
        value = 0;
        geneve.readz(0xA000, &mut value);
        assert_eq!(value, 0);
    }
}
