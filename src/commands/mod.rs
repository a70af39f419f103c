pub mod checklist;
pub mod cleaning;
pub mod discounts;
pub mod handovers;
pub mod plate_requests;
pub mod sales;
pub mod users;
