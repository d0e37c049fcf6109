pub mod lifecycle;
pub mod time;
