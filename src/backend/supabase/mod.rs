pub mod auth;
pub mod client;
pub mod models;
pub mod realtime;
pub mod rest;

pub use client::SupabaseClient;
