//! Wire protocol: framing, classification, parsing, and scheduling

pub mod codec;
pub mod dialect;
pub mod lines;
pub mod parsers;
pub mod scheduler;
pub mod send_record;

pub use dialect::{FirmwareDialect, ProtocolDialect};
pub use lines::FirmwareLine;
pub use scheduler::{CommandScheduler, ScheduledSource};
pub use send_record::{SendRecord, SentLine};
