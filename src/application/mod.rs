//! Request handling and the worker lifecycle.

pub mod error;
pub mod fetch;
pub mod strategies;
pub mod worker;
