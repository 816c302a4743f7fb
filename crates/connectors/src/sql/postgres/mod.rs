pub mod destination;
pub mod pool;
pub mod query;
pub mod source;
