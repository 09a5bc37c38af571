//! API handlers module

pub mod countries;
pub mod fetch;
pub mod health;
