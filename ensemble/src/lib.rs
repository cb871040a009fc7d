//! ensemble brings up the Cortex-M55 cores of the Alif Ensemble family and
//! the Arm Ethos-U55 NPU tightly coupled to each of them.
//!
//! The crate covers what has to happen before application code runs:
//!
//! - Programming the Memory Protection Unit from a per-core region table
//!   ([`mpu`], [`config`]).
//! - Running the board bring-up sequence: pin multiplexing, clocks, power
//!   domains, console, NPU and finally the L1 caches ([`board`]).
//! - Bootstrapping the NPU driver and routing its interrupt line through a
//!   bound trampoline ([`npu`], [`interrupt`]).
//!
//! It also offers [`gpio::GpioTriggerSignal`], a typed GPIO line used to
//! synchronize with external observers (e.g. a logic analyzer marking the
//! inference window).
//!
//! Firmware images are expected to be built for
//! `thumbv8m.main-none-eabihf`. The vendor startup code calls the
//! `MPU_Load_Regions` hook from `SystemInit`, before `.data` and `.bss` are
//! used by anything else. The `ensemble_macros::entrypoint` attribute
//! generates that hook.
//!
//! Every driver is generic over [`mmio::Mmio`], so the whole boot protocol
//! can be exercised on the host against a fake register file.

#![cfg_attr(not(test), no_std)]

pub mod app;
pub mod board;
pub mod cancel;
pub mod config;
pub mod cpu;
pub mod gpio;
pub mod interrupt;
pub mod mmio;
pub mod model;
pub mod mpu;
pub mod npu;
pub mod pinmux;
pub mod print;
pub mod uart;

#[cfg(test)]
mod testing;
