//! darkroom-booth library crate.
//!
//! Capture core of a photo booth: camera backends behind one [`device::Device`]
//! contract, and the session state machine that turns a live feed into
//! stills, boomerangs and videos.

pub mod cli;
pub mod clock;
pub mod config;
pub mod device;
pub mod handoff;
pub mod session;
