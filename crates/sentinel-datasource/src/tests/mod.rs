//! Behaviour suites for the datasource registry.

mod behaviour;
