pub mod assignment;
pub mod bulk;
pub mod candidates;
pub mod matcher;
