pub mod backend;

pub use backend::MemoryBlocklistBackend;
