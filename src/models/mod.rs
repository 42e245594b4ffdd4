pub mod actor;
pub mod bike;
pub mod booking;
pub mod money;
pub mod query;

pub use actor::{Actor, ActorRole};
pub use bike::{Bike, BikeStatus};
pub use booking::{Booking, BookingStatus, PaymentRecord, PaymentStatus, StatusChange};
pub use query::{BookingQuery, Field, FilterValue, Op};
