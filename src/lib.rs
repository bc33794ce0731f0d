#![doc = include_str!("RUSTDOC.md")]

pub mod app;
pub mod database;
pub mod deprecation;
pub mod logger;

#[cfg(test)]
pub mod test_support;
