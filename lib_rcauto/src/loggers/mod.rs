/// fern dispatch setup and log file rotation.
pub mod logsetup;

pub use logsetup::{parse_level, rotate_logs, setup_logging};
