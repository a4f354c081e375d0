pub mod pool;
pub mod postgres;

pub use pool::InstrumentedPool;
pub use postgres::{PgStatusStore, PgStatusTransaction};
