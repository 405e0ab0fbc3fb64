#![no_std]

#[cfg(feature = "std")]
extern crate std;

// Pulse-train timing engine shared by the host CLI and its tests.
//
// Everything here stays free of the standard library: device I/O, the
// blocking hold, and preview rendering are reached through the collaborator
// traits in `controller`, so the arithmetic and the run state machine can be
// exercised without a device attached.

pub mod controller;
pub mod quantity;
pub mod registers;
pub mod telemetry;
pub mod timing;
pub mod waveform;
