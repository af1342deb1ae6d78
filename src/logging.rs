use chrono::Local;
use env_logger::{Builder, Env};
use log::{LevelFilter, SetLoggerError};
use serde::Serialize;
use std::io::Write;

/// One log line as it is written out
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    level: String,
    message: String,
    timestamp: String,
}

impl LogMessage {
    pub fn new(record: &log::Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    fn line(&self) -> String {
        format!("{} [{}] {}", self.timestamp, self.level, self.message)
    }
}

/// Installs the global logger.
///
/// `level` is the default; a `RUST_LOG` variable takes precedence over it.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    let default_filter = level.to_string().to_lowercase();
    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| writeln!(buf, "{}", LogMessage::new(record).line()))
        .try_init()
}
