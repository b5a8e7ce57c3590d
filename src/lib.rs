pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod manager;
pub mod scenario;
pub mod service;
pub mod session;
pub mod tone;

pub use error::ToneError;
pub use manager::{ToneManager, ToneManagerStats, ToneState};
pub use service::{ToneHandle, ToneService};

pub type Sample = i16;
pub type PcmBuf = Vec<Sample>;
