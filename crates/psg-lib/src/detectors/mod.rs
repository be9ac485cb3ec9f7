pub mod amplitude;
pub mod apnea;
pub mod sleep_period;
