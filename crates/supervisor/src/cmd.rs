mod health;
mod provision;
mod start;

pub use health::run_health;
pub use provision::run_provision;
pub use start::run_start;
