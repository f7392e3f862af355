pub mod db;
pub mod layout;
pub mod types;
