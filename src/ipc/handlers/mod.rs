pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod institutions;
pub mod promotion;
pub mod setup;
pub mod students;
