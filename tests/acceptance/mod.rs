//! Workspace-level acceptance tests.

mod common;
mod move_test;
mod timing_test;
