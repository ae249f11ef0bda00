//! CLI command implementations

pub mod consume;
pub mod review;

pub use consume::ConsumeArgs;
pub use review::ReviewArgs;
