pub mod logging;

pub use logging::{default_log_file, init_logging};
