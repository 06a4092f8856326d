pub mod brake;
pub mod config;
pub mod correlation;
pub mod events;
pub mod packet_queue;
pub mod runner;
pub mod runtime_flags;
pub mod store;
