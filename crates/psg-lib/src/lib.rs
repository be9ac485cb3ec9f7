pub mod config;
pub mod detectors;
pub mod error;
pub mod io;
pub mod metrics;
pub mod plot;
pub mod signal;
pub mod synth;

pub use config::*;
pub use detectors::*;
pub use error::{DetectError, Result};
pub use metrics::*;
pub use signal::*;
