pub mod principal;
pub mod refill;
