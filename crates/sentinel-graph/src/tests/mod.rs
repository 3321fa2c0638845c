//! Behaviour suites for the initializer graph.

mod behaviour;
