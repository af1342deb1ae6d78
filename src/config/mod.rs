pub mod scanner_config;

pub use scanner_config::{CONFIG_FILE_NAME, ScannerConfig};
