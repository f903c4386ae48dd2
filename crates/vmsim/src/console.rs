//! Defines the console logger that writes log records to standard error.

use std::io::{self, Write};

use log::{LevelFilter, SetLoggerError};
use spin::Once;

pub struct Console {
    level: LevelFilter,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Creates the console and installs it as the global logger.
    pub fn init(level: LevelFilter) -> Result<&'static Self, SetLoggerError> {
        let console = DEFAULT.call_once(|| Console { level });
        console.install()?;
        Ok(console)
    }

    fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.level);
        Ok(())
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Nowhere left to report a failed write to stderr.
        let _ = write_log_entry_to(&mut io::stderr().lock(), record);
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> io::Result<()> {
    #[cfg(debug_assertions)]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(debug_assertions))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
