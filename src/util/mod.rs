//! Utility modules

pub mod paths;

pub use paths::{config_path, default_tape_path, init_data_dir, log_file_path, logs_dir};
