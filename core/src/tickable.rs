use anyhow::Result;

/// Representation of X amount of main-loop ticks of the host engine.
pub type Ticks = u64;

pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
