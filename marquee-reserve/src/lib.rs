pub mod manager;
pub mod table;

pub use manager::{LockError, LockManager, SeatMap};
pub use table::MemoryLockTable;
