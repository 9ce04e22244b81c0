pub mod memory;
pub mod postgres;

pub use memory::{Fault, MemoryStore};
pub use postgres::PostgresStore;
