use anyhow::Result;

/// Representation of X amount of ticks of the controller
/// input clock (CLK pin).
pub type Ticks = u64;

pub trait Tickable {
    /// Advances emulated time by the given amount of ticks, returning
    /// the amount of ticks consumed.
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
