//! Acceptance tests for the motion controller.
//!
//! These tests exercise the whole stack the way the daemon does:
//! bus bring-up over a transport, a dedicated exchange thread, the
//! mode sequencer ticking at a coarser period, and a staged shutdown.
//!
//! The timing tests measure against generous bounds so they stay
//! meaningful on loaded CI machines; tighter figures require root and
//! a PREEMPT_RT kernel.

mod acceptance;
