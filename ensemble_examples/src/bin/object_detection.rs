//! Runs one inference of the object detection model over a random input.
//!
//! P5_6 is held high as reference for a logic analyzer and P5_4 is high while
//! the inference runs.

#![no_std]
#![no_main]

use ensemble::app::{self, AnalyzerSignals};
use ensemble::board::{AlifEnsemble, BootReport};
use ensemble::gpio::{DwGpio, SignalLine};
use ensemble::mmio::Volatile;
use ensemble_examples::runtime::{self, NetworkRuntime};
use ensemble_macros::entrypoint;

/// Seed of the random input.
const SEED: u64 = 0x5eed_0b1e;

#[entrypoint(ensemble_examples::BOARD_CONFIG)]
fn object_detection(report: BootReport<AlifEnsemble<Volatile>>) -> i32 {
    log::info!("object detection on {}", report.profile.name());

    // Both analyzer lines live on the same port.
    let port = SignalLine::AnalyzerWindow.port();
    let signals = DwGpio::new(Volatile, port)
        .and_then(|gpio| AnalyzerSignals::new(gpio.clone(), gpio));
    let mut signals = match signals {
        Ok(signals) => signals,
        Err(err) => {
            log::error!("cannot configure signals: {err}");
            return app::AppError::Signal(err).code();
        }
    };

    let Some(arena) = runtime::take_arena() else {
        return 1;
    };

    let mut model = NetworkRuntime::new(report.board.accelerator());
    match app::run_once(&mut model, arena, runtime::model_data(), &mut signals, SEED) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("{err}");
            err.code()
        }
    }
}
