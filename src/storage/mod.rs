pub mod db;
pub mod events;
pub mod files;
pub mod models;
mod tables;
mod unit_of_work;
pub mod versions;

pub use db::{Database, DatabaseError, Reader, Snapshot};
pub use tables::*;
pub use unit_of_work::{Transaction, UnitOfWork};
