//! Integration test suite for weave.
//!
//! These tests drive the registry, the dependency analyzer and the
//! parallel scheduler together through the public API.
//!
//! # Test Categories
//!
//! - `parallel_execution`: Leveled and flat batch execution
//! - `registry_scenarios`: Priority override, dependency queries, executor caching
//! - `leveling_properties`: Property tests over random dependency graphs
//!
//! # CI Compatibility
//!
//! Executors are in-process recorders scripted through task payloads, so
//! nothing here touches the network or spawns processes.

mod fixtures;

mod leveling_properties;
mod registry_scenarios;
