//! Integration-style tests for the registry actor, exercised purely
//! through [`crate::RegistryHandle`] and a fake agent connection — no
//! broker, no sockets. Grounded on the teacher's
//! `core::tests::{helpers, lease_management}` split
//! (`examples/Alb-O-xeno/crates/broker/broker/src/core/tests/`).

mod helpers;

mod dispatch;
mod grace_and_reload;
