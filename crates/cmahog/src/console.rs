//! Logger that writes records to stderr.

use std::io::{self, Write};

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    level: LevelFilter,
    stderr: Mutex<io::Stderr>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger, showing records up to `level`.
    pub fn init(level: LevelFilter) -> Result<&'static Self, log::SetLoggerError> {
        let console = DEFAULT.call_once(|| Console {
            level,
            stderr: Mutex::new(io::stderr()),
        });
        log::set_logger(console)?;
        log::set_max_level(console.level);
        Ok(console)
    }

    /// Maps the number of `-v` flags to a level filter.
    pub fn level_for(verbosity: u8) -> LevelFilter {
        match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
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
        let mut stderr = self.stderr.lock();
        // Nowhere left to report a failed write to stderr.
        let _ = write_log_entry_to(&mut *stderr, record);
    }

    fn flush(&self) {
        let _ = self.stderr.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> io::Result<()> {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(Console::level_for(0), LevelFilter::Warn);
        assert_eq!(Console::level_for(1), LevelFilter::Info);
        assert_eq!(Console::level_for(2), LevelFilter::Debug);
        assert_eq!(Console::level_for(9), LevelFilter::Trace);
    }

    #[test]
    fn formats_entry() {
        let mut out = Vec::new();
        write_log_entry_to(
            &mut out,
            &log::Record::builder()
                .level(log::Level::Info)
                .target("ledger")
                .args(format_args!("alloc r1"))
                .build(),
        )
        .unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.contains("INFO"));
        assert!(line.ends_with("alloc r1\n"));
    }
}
