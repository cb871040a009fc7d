//! Waits for an external device to assert P5_6, reporting every second it
//! does not.

#![no_std]
#![no_main]

use ensemble::board::{AlifEnsemble, BootReport};
use ensemble::cancel::Deadline;
use ensemble::cpu::time::CycleCounter;
use ensemble::gpio::{Direction, DwGpio, Error, GpioTriggerSignal, SignalLine};
use ensemble::mmio::Volatile;
use ensemble::println;
use ensemble_examples::cycles_from_ms;
use ensemble_macros::entrypoint;

/// Time between reports.
const REPORT_MS: u32 = 1000;

#[entrypoint(ensemble_examples::BOARD_CONFIG)]
fn trigger_wait(_report: BootReport<AlifEnsemble<Volatile>>) -> i32 {
    let line = SignalLine::AnalyzerReference;
    let signal = DwGpio::new(Volatile, line.port())
        .and_then(|gpio| GpioTriggerSignal::new(gpio, line, Direction::Input));
    let signal = match signal {
        Ok(signal) => signal,
        Err(err) => {
            println!("cannot configure {line:?}: {err}");
            return 1;
        }
    };

    let clock = CycleCounter::new(Volatile);
    clock.enable();

    // No event wakes the core when the line rises, so poll.
    let mut yield_now = core::hint::spin_loop;
    let mut seconds = 0;
    loop {
        let deadline = Deadline::after(&clock, cycles_from_ms(REPORT_MS));
        match signal.wait_for_signal(Some(&mut yield_now), &deadline) {
            Ok(()) => break,
            Err(Error::Cancelled) => {
                seconds += 1;
                println!("waiting for {line:?} ({seconds} s)");
            }
            Err(err) => {
                println!("wait failed: {err}");
                return 1;
            }
        }
    }

    println!("{line:?} asserted");
    0
}
