pub mod seat;

pub use seat::{Buyer, EventSeatDocument, Seat, SeatStatus};
