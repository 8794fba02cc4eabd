pub mod controller;
pub mod models;
pub mod order_no;
pub mod store;

pub use controller::{CancelActor, OrderController, OrderError};
pub use models::{Order, OrderStatus};
pub use order_no::OrderNumberGenerator;
pub use store::{MemoryOrderStore, OrderStore, TransitionError};
