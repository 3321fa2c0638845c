//! Test suites for the application bootstrap.

mod behaviour;
mod support;
