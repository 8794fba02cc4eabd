use serde::{Deserialize, Serialize};
use std::fmt;

/// A single seat position inside a room. Indices are 1-based.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SeatPos {
    pub row: i32,
    pub col: i32,
}

impl SeatPos {
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Human-readable label: row letter plus column ("A5"). Rooms deeper
    /// than 26 rows fall back to a numeric form.
    pub fn label(&self) -> String {
        if (1..=26).contains(&self.row) {
            let row_char = (b'A' + (self.row - 1) as u8) as char;
            format!("{}{}", row_char, self.col)
        } else {
            format!("R{}C{}", self.row, self.col)
        }
    }
}

impl fmt::Display for SeatPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.row, self.col)
    }
}

/// Joins seat positions for error messages: "[1,5], [1,6]".
pub fn format_seats(seats: &[SeatPos]) -> String {
    seats
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Derived per-seat state. Never stored; always computed from the lock
/// table and the order seat claims for a screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked,
    Sold,
    Unavailable,
}

/// Room geometry for one screening. `blocked` marks seats that exist in
/// the grid but cannot be sold (broken seats, camera positions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomLayout {
    pub rows: i32,
    pub cols: i32,
    #[serde(default)]
    pub blocked: Vec<SeatPos>,
}

impl RoomLayout {
    pub fn new(rows: i32, cols: i32) -> Self {
        Self {
            rows,
            cols,
            blocked: Vec::new(),
        }
    }

    pub fn with_blocked(rows: i32, cols: i32, blocked: Vec<SeatPos>) -> Self {
        Self { rows, cols, blocked }
    }

    pub fn contains(&self, seat: SeatPos) -> bool {
        seat.row >= 1 && seat.row <= self.rows && seat.col >= 1 && seat.col <= self.cols
    }

    pub fn is_blocked(&self, seat: SeatPos) -> bool {
        self.blocked.contains(&seat)
    }

    /// A seat a customer is allowed to hold: inside the grid and not blocked.
    pub fn is_sellable(&self, seat: SeatPos) -> bool {
        self.contains(seat) && !self.is_blocked(seat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_label_uses_row_letters() {
        assert_eq!(SeatPos::new(1, 5).label(), "A5");
        assert_eq!(SeatPos::new(26, 12).label(), "Z12");
        assert_eq!(SeatPos::new(27, 3).label(), "R27C3");
    }

    #[test]
    fn layout_bounds_and_blocked() {
        let layout = RoomLayout::with_blocked(10, 10, vec![SeatPos::new(5, 5)]);
        assert!(layout.is_sellable(SeatPos::new(1, 1)));
        assert!(layout.is_sellable(SeatPos::new(10, 10)));
        assert!(!layout.is_sellable(SeatPos::new(0, 1)));
        assert!(!layout.is_sellable(SeatPos::new(11, 1)));
        assert!(!layout.is_sellable(SeatPos::new(5, 5)));
    }
}
