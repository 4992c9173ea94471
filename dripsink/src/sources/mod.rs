//! Concrete source adapters.
//!
//! Each adapter implements [`crate::source::Source`] and differs only in how
//! it fetches readings:
//!
//! - [`aranet`] - Aranet base station (authenticated vendor HTTP API)
//! - [`somneo`] - Philips Somneo lamp sensors (vendor HTTP API)
//! - [`random`] - bounded synthetic readings
//! - [`system`] - local OS metrics

pub mod aranet;
pub mod random;
pub mod somneo;
pub mod system;

pub use aranet::AranetSource;
pub use random::RandomSource;
pub use somneo::SomneoSource;
pub use system::SystemSource;
