pub mod config;
pub mod dao;
pub mod gateway;
pub mod logger;
pub mod web;
