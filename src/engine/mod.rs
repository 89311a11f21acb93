pub mod absentees;
pub mod corrections;
pub mod cursor;
pub mod direction;
pub mod mandays;
pub mod metrics;
pub mod processor;
pub mod window;

#[cfg(test)]
mod sweep_tests;
