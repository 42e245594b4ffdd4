pub mod availability;
pub mod bikes;
pub mod bookings;
pub mod lifecycle;
pub mod notifications;
pub mod payments;
pub mod pricing;
pub mod projection;
pub mod reconciliation;
