//! A `log` backend for hosts that do not bring their own.
//!
//! Records are formatted on a single line and written to any [core::fmt::Write] sink, such as a
//! debug UART.

use alloc::boxed::Box;
use core::fmt::Write;

use log::{LevelFilter, SetLoggerError};
use spin::{Mutex, Once};

pub type Sink = Box<dyn Write + Send>;

pub struct SinkLogger {
    sink: Mutex<Sink>,
    level: LevelFilter,
}

impl SinkLogger {
    pub fn new(sink: Sink, level: LevelFilter) -> SinkLogger {
        SinkLogger {
            sink: Mutex::new(sink),
            level,
        }
    }
}

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut sink = self.sink.lock();
        // nowhere to report a failing sink
        let _ = writeln!(
            sink,
            "[{:<5} {} {}:{}] {}",
            record.level(),
            record.module_path().unwrap_or("unknown module"),
            record.file().unwrap_or("unknown file"),
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: Once<SinkLogger> = Once::new();

/// Install a [SinkLogger] as the global logger. Fails if a logger is already installed.
pub fn init_logging(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(move || SinkLogger::new(sink, level));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
