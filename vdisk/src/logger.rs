// Boot log sink for the virtual disk
//
// Keeps the last MAX_LOG_ENTRIES records in memory so they can be shown
// after the disk is mounted, when no console may be around.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub const MAX_LOG_ENTRIES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

struct BootLogger {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl BootLogger {
    const fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

impl log::Log for BootLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Format: target: message
            self.push(LogEntry {
                level: record.level(),
                message: format!("{}: {}", record.target(), record.args()),
            });
        }
    }

    fn flush(&self) {}
}

static LOGGER: BootLogger = BootLogger::new();

/// Install the boot log sink; fails if another logger is already set
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Snapshot of the retained entries, oldest first
pub fn entries() -> Vec<LogEntry> {
    LOGGER.entries.lock().iter().cloned().collect()
}

pub fn log_count() -> usize {
    LOGGER.entries.lock().len()
}

pub fn clear() {
    LOGGER.entries.lock().clear();
}
