pub mod database;
pub mod error;
pub mod feedback;
pub mod room_state;
pub mod rooms;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use feedback::FeedbackRepo;
pub use room_state::RoomStateRepo;
pub use rooms::{CreatedRoom, NewRoom, RoomRepo, RoomRow};
