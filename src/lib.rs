//! Dice scanner library
//! Discovers Bluetooth LE dice, decodes what they advertise and keeps a
//! deduplicated, continuously updated list of the dice in range.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
