use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};

/// Carries the links a saved state cannot hold (callbacks, external
/// devices, card line handles) over from the live instance to a restored
/// one.
pub trait Relink {
    fn relink(&mut self, _previous: &mut Self) {}
}

pub trait SaveState {
    fn save_state(&self) -> anyhow::Result<String>;
    fn load_state(&mut self, state: &str) -> anyhow::Result<()>;
}

impl<T> SaveState for T
where
    T: Serialize + DeserializeOwned + Relink,
{
    fn save_state(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("Unable to serialize state")
    }

    fn load_state(&mut self, state: &str) -> anyhow::Result<()> {
        let mut restored: T = serde_json::from_str(state).context("Unable to restore state")?;
        restored.relink(self);
        *self = restored;
        Ok(())
    }
}
