//! Testing utilities.
//!
//! This module provides:
//! - An in-memory control plane with call journaling, failure injection and
//!   scriptable lifecycles
//! - A nested-stack fixture
//! - A test bed wiring both into a deployment context with fake
//!   collaborators

mod bed;
mod cloud;
mod fixtures;

pub use bed::{FakeImageBuilder, FakeIngestor, FakePackager, FakeTuningGenerator, TestBed};
pub use cloud::{Call, InMemoryCloud, Scripted};
pub use fixtures::{nested_stack_fixture, StackFixture};
