mod config_value;
mod record;
pub use config_value::*;
pub use record::*;

#[cfg(test)]
mod record_test;
