pub mod memory;
pub mod postgres;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use postgres::PgStore;
