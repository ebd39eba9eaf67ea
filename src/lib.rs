#[macro_use] extern crate diesel;
#[macro_use] extern crate failure;
#[macro_use] extern crate failure_derive;
#[macro_use] extern crate log;
#[macro_use] extern crate serde_derive;

#[cfg(not(debug_assertions))]
#[macro_use]
extern crate diesel_migrations;

pub use self::cli::main;

pub(crate) use self::config::Config;

#[macro_use] mod macros;

pub mod cli;
pub mod config;
pub mod db;
pub mod export;
pub mod import;
pub mod mail;
pub mod models;
pub mod retire;
pub mod services;
pub mod submission;
pub mod upload;
pub mod utils;

pub type Result<T, E=failure::Error> = std::result::Result<T, E>;
