pub mod business_days;
pub mod scheduler;
