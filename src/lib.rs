pub mod amigo;
pub mod ams;
pub mod clock;
pub mod config;
pub mod cru;
pub mod datamux;
pub mod device;
pub mod error;
pub mod grom;
pub mod machine;
pub mod mainboard8;
pub mod mofetta;
pub mod oso;
pub mod pcode;
pub mod peribox;
pub mod samsmem;
pub mod signal;
pub mod slot;
pub mod state;
pub mod ti32k;
pub mod vaquerro;

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

pub use ams::AmsMapper;
pub use config::{Mainboard8Config, MachineConfig};
pub use cru::CruAddress;
pub use datamux::Datamux;
pub use device::ByteDevice;
pub use error::ConfigError;
pub use machine::{Machine, MachineBuilder};
pub use mainboard8::{Mainboard8, Mainboard8Builder};
pub use peribox::{PeripheralBox, PeriboxVariant};
pub use signal::{LineState, WiredAnd};
pub use slot::{CardLines, PeripheralCard};
pub use state::SaveState;

/// Installs a fmt subscriber filtered by `RUST_LOG`. Does nothing if the
/// host already installed one.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

/// Reads a ROM or GROM image.
pub fn load_image(path: impl AsRef<Path>) -> anyhow::Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).with_context(|| format!("Unable to read image {}", path.display()))
}

/// TI-99/4A console with an empty expansion box.
pub fn get_machine(rom: &[u8], grom: &[u8]) -> Result<Machine, ConfigError> {
    MachineBuilder::new().system_rom(rom).system_grom(grom).build()
}
