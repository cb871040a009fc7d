//! Console writer, print macros and logger.
//!
//! Output goes to the console registered with [`set_console`]. Until one is
//! registered, everything printed is dropped. [`init_logger`] routes the
//! `log` facade to the same console.

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record};
use spin::mutex::TicketMutex;

use crate::cpu::without_interrupts;

/// Byte sink used by the print macros.
pub trait Console: Sync {
    /// Writes `bytes` to the console.
    fn write_bytes(&self, bytes: &[u8]);
}

/// Registered console.
static CONSOLE: TicketMutex<Option<&'static dyn Console>> = TicketMutex::new(None);

/// Registers the console used by the print macros and the logger.
pub fn set_console(console: &'static dyn Console) {
    without_interrupts(|| *CONSOLE.lock() = Some(console));
}

/// Implements a writer on top of the registered console.
pub struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Masked so a handler that prints cannot spin on a lock taken by the
        // code it interrupted.
        let Some(console) = without_interrupts(|| *CONSOLE.lock()) else {
            return Ok(());
        };

        for line in s.split_inclusive('\n') {
            match line.strip_suffix('\n') {
                Some(text) => {
                    console.write_bytes(text.as_bytes());
                    console.write_bytes(b"\r\n");
                }
                None => console.write_bytes(line.as_bytes()),
            }
        }

        Ok(())
    }
}

/// Print to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        let _ = core::fmt::Write::write_fmt(
            &mut $crate::print::ConsoleWriter,
            core::format_args!($($arg)*),
        );
    };
}

/// Print to the console, with a newline.
#[macro_export]
macro_rules! println {
    () => {
        $crate::println!("");
    };

    ($($arg:tt)*) => {
        let _ = core::fmt::Write::write_fmt(
            &mut $crate::print::ConsoleWriter,
            core::format_args!("{}\n", core::format_args!($($arg)*)),
        );
    };
}

/// Logger writing to the registered console.
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::println!("[{:<5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Installs [`ConsoleLogger`] as the logger, with the given maximum level.
/// Calling it again only updates the level.
pub fn init_logger(level: LevelFilter) {
    // A logger can only be set once. Later calls keep the first one.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    struct Capture(Mutex<Vec<u8>>);

    impl Console for Capture {
        fn write_bytes(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    #[test]
    fn macros_and_logger_reach_the_console() {
        let capture: &'static Capture = Box::leak(Box::new(Capture(Mutex::new(Vec::new()))));
        set_console(capture);

        crate::print!("boot ");
        crate::println!("{}", 1);
        assert_eq!(capture.0.lock().unwrap().as_slice(), b"boot 1\r\n");

        init_logger(LevelFilter::Info);
        log::info!(target: "print-test", "ready");
        log::debug!(target: "print-test", "hidden");

        // Other tests may log concurrently.
        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("[INFO ] print-test: ready\r\n"));
        assert!(!out.contains("hidden"));
    }
}
