pub mod books;
pub mod core;
pub mod reports;
pub mod students;
