//! Data model for printer state
//!
//! Temperature and position records, firmware information, SD card file
//! entries, and print progress. These records are mutated only by the
//! reply parsers on the receive path; listeners observe snapshots.

pub mod firmware;
pub mod position;
pub mod sd;
pub mod temperature;

pub use firmware::FirmwareInfo;
pub use position::PositionRecord;
pub use sd::{PrintProgress, SdFile};
pub use temperature::{HeaterId, TemperatureReading, TemperatureRecord};
