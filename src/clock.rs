use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::signal::LineState;

/// TMS9900 clock (CLKOUT) frequency
pub const CPU_CLOCK_HZ: u32 = 3_000_000;

/// CPU cycles per GROMCLK period; the GROMs run at a quarter of CLKOUT
pub const DEFAULT_GROMCLK_DIVIDER: u32 = 4;

/// Event types the clock delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockEvent {
    /// CLKOUT edge; every cycle produces a rising and a falling edge
    ClockOut(LineState),
    /// GROMCLK edge
    GromClock(LineState),
    /// Release of a reset pulse scheduled by the machine
    ResetRelease,
}

/// Scheduled event with timing information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ScheduledEvent {
    cycle: u64,
    event: ClockEvent,
}

/// Master clock of the bus.
///
/// Cycle edges are produced directly; everything else (GROMCLK, deferred
/// machine events) goes through an ordered event queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// Total CPU cycles executed
    total_cycles: u64,

    /// CPU cycles per GROMCLK period
    gromclk_divider: u32,

    /// Event queue, ordered by cycle
    events: VecDeque<ScheduledEvent>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DEFAULT_GROMCLK_DIVIDER)
    }
}

impl Clock {
    pub fn new(gromclk_divider: u32) -> Self {
        let mut clock = Self {
            total_cycles: 0,
            gromclk_divider: gromclk_divider.max(2),
            events: VecDeque::new(),
        };

        clock.schedule_gromclk();
        clock
    }

    /// Reset the clock to initial state
    pub fn reset(&mut self) {
        self.total_cycles = 0;
        self.events.clear();
        self.schedule_gromclk();
    }

    /// Advance the clock by the specified number of CPU cycles.
    ///
    /// Per cycle the rising CLKOUT edge comes first, then every event due
    /// in this cycle, then the falling edge.
    pub fn tick(&mut self, cycles: u32) -> Vec<ClockEvent> {
        let mut triggered_events = Vec::new();

        for _ in 0..cycles {
            self.total_cycles += 1;
            triggered_events.push(ClockEvent::ClockOut(LineState::Assert));

            while let Some(event) = self.events.front() {
                if event.cycle > self.total_cycles {
                    break;
                }
                if let Some(event) = self.events.pop_front() {
                    if let ClockEvent::GromClock(LineState::Assert) = event.event {
                        let half = (self.gromclk_divider / 2) as u64;
                        self.schedule(half, ClockEvent::GromClock(LineState::Clear));
                        self.schedule_gromclk();
                    }
                    triggered_events.push(event.event);
                }
            }

            triggered_events.push(ClockEvent::ClockOut(LineState::Clear));
        }

        triggered_events
    }

    /// Schedule an event `delay` cycles from now (at least one cycle).
    pub fn schedule(&mut self, delay: u64, event: ClockEvent) {
        let cycle = self.total_cycles + delay.max(1);
        let position = self
            .events
            .iter()
            .position(|scheduled| scheduled.cycle > cycle)
            .unwrap_or(self.events.len());
        self.events.insert(position, ScheduledEvent { cycle, event });
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn gromclk_divider(&self) -> u32 {
        self.gromclk_divider
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Rising GROMCLK edge at the start of the next period. The falling
    /// edge is scheduled when the rising edge fires.
    fn schedule_gromclk(&mut self) {
        let period = self.gromclk_divider as u64;
        self.schedule(period, ClockEvent::GromClock(LineState::Assert));
    }
}
