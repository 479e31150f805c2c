pub mod context;
pub mod entity;
pub mod execution;
pub mod intent;
pub mod query;
