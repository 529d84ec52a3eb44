use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::signal::LineState;

/// Clock cycles per nibble on the Hexbus.
pub const NIBBLE_CLOCKS: u8 = 8;

pub const STATUS_RECEIVE_FULL: u8 = 0x01;
pub const STATUS_TRANSMIT_BUSY: u8 = 0x02;
pub const STATUS_HEXBUS_ACTIVE: u8 = 0x04;

/// Hexbus adapter of the TI-99/8.
///
/// Four registers on even offsets: data (0), status (2), control (4) and
/// transmit readback (6). A byte written to the data register goes out as
/// two nibbles, low nibble first.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oso {
    data: u8,
    status: u8,
    control: u8,
    xmit: u8,
    clkcount: u8,
    xmit_send: u8,
    hexbus: VecDeque<u8>,
}

impl Oso {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, offset: u16) -> u8 {
        match offset & 6 {
            0 => {
                self.status &= !STATUS_RECEIVE_FULL;
                self.data
            }
            2 => self.status,
            4 => self.control,
            _ => self.xmit,
        }
    }

    pub fn write(&mut self, offset: u16, data: u8) {
        match offset & 6 {
            0 => {
                tracing::debug!("[OSO] Transmit {:02X}", data);
                self.xmit = data;
                self.xmit_send = 2;
                self.clkcount = 0;
                self.status |= STATUS_TRANSMIT_BUSY | STATUS_HEXBUS_ACTIVE;
            }
            4 => {
                tracing::debug!("[OSO] Control {:02X}", data);
                self.control = data;
            }
            _ => {
                tracing::trace!("[OSO] Ignoring write to {:X}", offset & 6);
            }
        }
    }

    pub fn clock_in(&mut self, state: LineState) {
        if state.is_clear() || self.xmit_send == 0 {
            return;
        }

        self.clkcount += 1;
        if self.clkcount < NIBBLE_CLOCKS {
            return;
        }
        self.clkcount = 0;

        let nibble = if self.xmit_send == 2 {
            self.xmit & 0x0F
        } else {
            self.xmit >> 4
        };
        tracing::trace!("[OSO] Nibble {:X}", nibble);
        self.hexbus.push_back(nibble);
        self.xmit_send -= 1;

        if self.xmit_send == 0 {
            self.status &= !(STATUS_TRANSMIT_BUSY | STATUS_HEXBUS_ACTIVE);
        }
    }

    /// Byte arriving from the Hexbus.
    pub fn hexbus_value_changed(&mut self, data: u8) {
        tracing::trace!("[OSO] Received {:02X}", data);
        self.data = data;
        self.status |= STATUS_RECEIVE_FULL;
    }

    /// Nibbles sent since the last call.
    pub fn take_hexbus(&mut self) -> Vec<u8> {
        self.hexbus.drain(..).collect()
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_nibbles() {
        let mut oso = Oso::new();
        oso.write(0, 0xA5);
        assert_eq!(oso.read(2), STATUS_TRANSMIT_BUSY | STATUS_HEXBUS_ACTIVE);
        assert_eq!(oso.read(6), 0xA5);

        for _ in 0..NIBBLE_CLOCKS * 2 - 1 {
            oso.clock_in(LineState::Assert);
            oso.clock_in(LineState::Clear);
        }
        assert_eq!(oso.take_hexbus(), vec![0x5]);
        assert_ne!(oso.status() & STATUS_TRANSMIT_BUSY, 0);

        oso.clock_in(LineState::Assert);
        assert_eq!(oso.take_hexbus(), vec![0xA]);
        assert_eq!(oso.status(), 0);
    }

    #[test]
    fn test_receive() {
        let mut oso = Oso::new();
        oso.hexbus_value_changed(0x42);
        assert_eq!(oso.read(2), STATUS_RECEIVE_FULL);
        assert_eq!(oso.read(0), 0x42);
        assert_eq!(oso.read(2), 0);
    }
}
