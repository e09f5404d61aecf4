//! # Scenario Tests
//!
//! End-to-end checks that run a snapshot through a board into the slot array
//! and page the result onto an in-memory clock.
