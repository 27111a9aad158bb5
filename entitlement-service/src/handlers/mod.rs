pub mod account;
pub mod catalog;
pub mod chapters;
pub mod coins;
pub mod health;
pub mod subscriptions;
