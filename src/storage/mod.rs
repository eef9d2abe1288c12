pub mod cache;
pub mod db;
pub mod files;
pub mod migrations;
pub mod renewals;
