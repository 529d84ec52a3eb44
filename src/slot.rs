use std::{cell::RefCell, collections::VecDeque, fmt::Debug, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{cru::CruAddress, peribox::PeriboxVariant, signal::LineState};

/// Lowest and highest slot that take a card. Slot 1 holds the console
/// interface (or the SGCPU / Geneve host card).
pub const FIRST_CARD_SLOT: usize = 2;
pub const LAST_CARD_SLOT: usize = 8;

/// Address lines AMA/AMB/AMC as seen by the cards of a console-attached box.
pub const CONSOLE_SPACE: u32 = 0x70000;

/// Line a card can drive towards the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardLine {
    Inta,
    Intb,
    Lcp,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSignal {
    pub slot: usize,
    pub line: CardLine,
    pub state: LineState,
}

/// Upward connection of a card to its slot.
///
/// The handle only queues line changes; the box collects and joins them
/// after every broadcast. A detached handle (the default, used after
/// deserializing a card) queues into a buffer nobody reads until the box
/// attaches the card again.
#[derive(Debug, Clone, Default)]
pub struct CardLines {
    slot: usize,
    queue: Rc<RefCell<VecDeque<SlotSignal>>>,
}

impl CardLines {
    pub(crate) fn new(slot: usize, queue: Rc<RefCell<VecDeque<SlotSignal>>>) -> Self {
        Self { slot, queue }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn set_inta(&self, state: LineState) {
        self.send(CardLine::Inta, state);
    }

    pub fn set_intb(&self, state: LineState) {
        self.send(CardLine::Intb, state);
    }

    pub fn set_lcp(&self, state: LineState) {
        self.send(CardLine::Lcp, state);
    }

    pub fn set_ready(&self, state: LineState) {
        self.send(CardLine::Ready, state);
    }

    fn send(&self, line: CardLine, state: LineState) {
        self.queue.borrow_mut().push_back(SlotSignal {
            slot: self.slot,
            line,
            state,
        });
    }
}

/// Address window of a card's DSR ROM (0x4000-0x5FFF), which moves when
/// the console carries the Genmod modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsrSelect {
    mask: u32,
    value: u32,
}

impl DsrSelect {
    pub const fn standard() -> Self {
        Self {
            mask: 0x7E000,
            value: 0x74000,
        }
    }

    pub const fn genmod() -> Self {
        Self {
            mask: 0x1FE000,
            value: 0x174000,
        }
    }

    pub const fn for_genmod(genmod: bool) -> Self {
        if genmod {
            Self::genmod()
        } else {
            Self::standard()
        }
    }

    pub const fn matches(&self, offset: u32) -> bool {
        offset & self.mask == self.value
    }
}

impl Default for DsrSelect {
    fn default() -> Self {
        Self::standard()
    }
}

/// Returns the 16-bit console address if `offset` lies in the console
/// address space of the box.
pub fn console_address(offset: u32) -> Option<u16> {
    if offset & CONSOLE_SPACE == CONSOLE_SPACE {
        Some((offset & 0xFFFF) as u16)
    } else {
        None
    }
}

/// Card plugged into a slot of the peripheral expansion box.
///
/// Every card sees every access. `readz` must only touch `value` when the
/// card decodes the address; other cards may already have put a value on
/// the bus.
#[typetag::serde(tag = "card")]
pub trait PeripheralCard: Debug {
    fn name(&self) -> &str;

    /// Connects the card's output lines. Called on insertion and after the
    /// box has been restored from a saved state.
    fn attach(&mut self, lines: CardLines);

    fn setaddress_dbin(&mut self, _offset: u32, _dbin: LineState) {}

    fn readz(&mut self, offset: u32, value: &mut u8);

    fn write(&mut self, offset: u32, data: u8);

    fn crureadz(&mut self, _offset: CruAddress, _value: &mut u8) {}

    fn cruwrite(&mut self, _offset: CruAddress, _data: u8) {}

    fn clock_in(&mut self, _state: LineState) {}

    /// Interrupt status readback enable, group A.
    fn senila(&mut self, _state: LineState) {}

    /// Interrupt status readback enable, group B.
    fn senilb(&mut self, _state: LineState) {}

    fn set_genmod(&mut self, _genmod: bool) {}

    fn reset(&mut self) {}

    fn supports(&self, _variant: PeriboxVariant) -> bool {
        true
    }

    /// False for cards that only decode the unmodified address layout.
    fn supports_genmod(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Slot {
    number: usize,
    card: Box<dyn PeripheralCard>,
}

impl Slot {
    pub fn new(number: usize, card: Box<dyn PeripheralCard>) -> Self {
        Self { number, card }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn card(&self) -> &dyn PeripheralCard {
        self.card.as_ref()
    }

    pub fn card_mut(&mut self) -> &mut dyn PeripheralCard {
        self.card.as_mut()
    }

    pub fn into_card(self) -> Box<dyn PeripheralCard> {
        self.card
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsr_select() {
        let standard = DsrSelect::standard();
        assert!(standard.matches(0x74000));
        assert!(standard.matches(0x75FFE));
        assert!(!standard.matches(0x76000));
        assert!(!standard.matches(0x04000));

        let genmod = DsrSelect::genmod();
        assert!(genmod.matches(0x174000));
        assert!(!genmod.matches(0x74000));
    }

    #[test]
    fn test_console_address() {
        assert_eq!(console_address(0x7A000), Some(0xA000));
        assert_eq!(console_address(0x0A000), None);
    }

    #[test]
    fn test_card_lines_queue() {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let lines = CardLines::new(5, queue.clone());
        lines.set_inta(LineState::Assert);
        lines.set_ready(LineState::Clear);

        let signals: Vec<_> = queue.borrow_mut().drain(..).collect();
        assert_eq!(
            signals,
            vec![
                SlotSignal {
                    slot: 5,
                    line: CardLine::Inta,
                    state: LineState::Assert
                },
                SlotSignal {
                    slot: 5,
                    line: CardLine::Ready,
                    state: LineState::Clear
                },
            ]
        );
    }
}
