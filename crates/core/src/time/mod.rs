pub mod business_date;
pub mod weeks;
