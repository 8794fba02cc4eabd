pub mod lock;
pub mod repository;
pub mod seat;

pub use lock::SeatLock;
pub use repository::{
    InsertOutcome, RemoveOutcome, ScreeningDirectory, SeatClaim, SeatClaimSource, SeatLockTable,
    StoreError,
};
pub use seat::{format_seats, RoomLayout, SeatPos, SeatStatus};
