//! Tests for the seine-engine crate.

mod helpers;

mod concurrency;
