pub mod assignment;
pub mod order;
pub mod rider;
