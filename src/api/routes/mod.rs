pub mod health;
pub mod hosts;
pub mod metrics;
pub mod stats;
