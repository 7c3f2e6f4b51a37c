pub mod health;
pub mod revocation;
pub mod stats;
