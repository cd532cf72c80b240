//! Reply parsers
//!
//! One module per reply family. Parsers never mutate connection state;
//! they return plain data the state machine folds in. A line that fails to
//! parse is dropped, never reordered.

pub mod firmware;
pub mod position;
pub mod resend;
pub mod sd;
pub mod temperature;
