// Configuration error types

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Slot {0} is not a card slot (valid slots are 2 to 8)")]
    InvalidSlot(usize),

    #[error("Slot {0} is already occupied by {1}")]
    SlotOccupied(usize, String),

    #[error("Wait state count must be at least 1")]
    InvalidWaitStates,

    #[error("GROM clock divider must be at least 2")]
    InvalidClockDivider,

    #[error("{name} image has {size:#X} bytes, at most {max:#X} fit")]
    ImageTooLarge {
        name: &'static str,
        size: usize,
        max: usize,
    },

    #[error("Invalid RAM size {0:#X}")]
    InvalidRamSize(usize),
}
