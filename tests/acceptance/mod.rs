//! End-to-end scenarios against a live slave server.
//!
//! Every test binds its own ephemeral TCP port or temporary Unix socket, so
//! the suite runs in parallel without privileges.

mod common;
mod cyclic_test;
mod startup_test;
