use std::fmt::Debug;

use crate::signal::LineState;

/// 8-bit memory mapped device hanging off the console side of the bus
/// (sound, video, speech, GROMs, cartridge port).
///
/// Devices decode the address themselves. `readz` must leave `value`
/// untouched when the device is not addressed, so several devices can be
/// polled in a row.
pub trait ByteDevice: Debug {
    fn name(&self) -> &str;

    /// Address and DBIN of the next access, sent before `readz`/`write`.
    fn setaddress_dbin(&mut self, _offset: u16, _dbin: LineState) {}

    fn readz(&mut self, offset: u16, value: &mut u8);

    fn write(&mut self, offset: u16, data: u8);

    /// GROM clock as derived by the console (VDP or Mofetta).
    fn gromclk_in(&mut self, _state: LineState) {}

    /// CPU clock output.
    fn clock_in(&mut self, _state: LineState) {}

    /// READY output; `Clear` stretches the current bus cycle.
    fn ready(&self) -> LineState {
        LineState::Assert
    }

    fn reset(&mut self) {}
}
