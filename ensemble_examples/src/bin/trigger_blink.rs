//! Blinks the green LED of LED1 through a trigger signal.

#![no_std]
#![no_main]

use ensemble::board::{AlifEnsemble, BootReport};
use ensemble::cancel::{Cancellation, Deadline};
use ensemble::cpu::time::CycleCounter;
use ensemble::gpio::{Direction, DwGpio, GpioTriggerSignal, SignalLine};
use ensemble::mmio::Volatile;
use ensemble::println;
use ensemble_examples::cycles_from_ms;
use ensemble_macros::entrypoint;

/// Half period of the blink.
const HALF_PERIOD_MS: u32 = 500;

#[entrypoint(ensemble_examples::BOARD_CONFIG)]
fn trigger_blink(_report: BootReport<AlifEnsemble<Volatile>>) -> i32 {
    let line = SignalLine::Led1Green;
    let signal = DwGpio::new(Volatile, line.port())
        .and_then(|gpio| GpioTriggerSignal::new(gpio, line, Direction::Output));
    let mut signal = match signal {
        Ok(signal) => signal,
        Err(err) => {
            println!("cannot configure LED: {err}");
            return 1;
        }
    };

    let clock = CycleCounter::new(Volatile);
    clock.enable();

    let mut on = false;
    loop {
        on = !on;
        if let Err(err) = signal.send(on) {
            println!("cannot drive LED: {err}");
            return 1;
        }

        let deadline = Deadline::after(&clock, cycles_from_ms(HALF_PERIOD_MS));
        while !deadline.is_cancelled() {}
    }
}
