//! Test fixtures shared by unit and integration tests

pub mod helpers;

pub use helpers::{drive_tick, test_config, test_settings, wide_stop_settings, TestRig, TEST_SYMBOL};
