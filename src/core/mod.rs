pub mod aggregator;
pub mod classify;
pub mod engine;
pub mod fifo;
pub mod report;
pub mod windows;
