//! Service bus integration tests, over the in-memory transport.

#![cfg(feature = "in-memory")]

mod support;
mod registration;
mod reception;
mod isolation;
