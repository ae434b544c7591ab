#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod archive;
pub mod config;
pub mod core;
pub mod error;
pub mod registry;
pub mod resolve;
pub mod runtime;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;
