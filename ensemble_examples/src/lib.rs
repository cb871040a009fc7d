//! Shared pieces of the example firmware images.
//!
//! The target core is selected here, and only here, with the `m55-hp`
//! (default) or `m55-he` cargo feature.

#![cfg_attr(not(test), no_std)]

use ensemble::config::BoardConfig;

pub mod runtime;

#[cfg(all(feature = "m55-hp", feature = "m55-he"))]
compile_error!("select a single core: build m55-he with --no-default-features");

/// Board configuration of the image.
#[cfg(not(feature = "m55-he"))]
pub const BOARD_CONFIG: BoardConfig = BoardConfig::HP;

/// Board configuration of the image.
#[cfg(feature = "m55-he")]
pub const BOARD_CONFIG: BoardConfig = BoardConfig::HE;

/// Core clock frequency in Hz.
#[cfg(not(feature = "m55-he"))]
pub const CPU_HZ: u32 = 400_000_000;

/// Core clock frequency in Hz.
#[cfg(feature = "m55-he")]
pub const CPU_HZ: u32 = 160_000_000;

/// Returns the number of core cycles in `ms` milliseconds.
pub const fn cycles_from_ms(ms: u32) -> u32 {
    (CPU_HZ / 1000) * ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_preset() {
        assert_eq!(BOARD_CONFIG, BoardConfig::for_profile(BOARD_CONFIG.profile));
        assert_eq!(cycles_from_ms(1000), CPU_HZ);
    }
}
