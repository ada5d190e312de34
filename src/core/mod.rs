pub mod db;
pub mod spool;
pub mod sweeper;
pub mod upload;
