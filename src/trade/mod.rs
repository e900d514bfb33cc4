pub mod averaging;
pub mod changes;
pub mod execution;
pub mod exit_strategy;
pub mod history;
pub mod notify;
pub mod processors;
