#[macro_use] extern crate anyhow;
#[macro_use] extern crate diesel;

pub mod blobs;
pub mod cleanup;
pub mod conf;
pub mod db;
pub mod errors;
pub mod files;
pub mod gateway;
pub mod jobs;
pub mod schema;
pub mod sessions;
pub mod web;
