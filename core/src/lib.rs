pub mod bus;
pub mod config;
pub mod debuggable;
#[cfg(feature = "savestates")]
pub mod savestate;
pub mod scsi;
pub mod tickable;
pub mod types;

#[cfg(test)]
pub mod test;

/// Version string of this crate, embedded in save states
pub const fn build_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
