pub mod balance;
pub mod delegation;
pub mod producer_snapshot;
pub mod token;
pub mod voter;
