//! Utilities for testing code that uses packet queues. They are used for testing the queue
//!  itself, but they are also exported for application testing.

pub mod events;
