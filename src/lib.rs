//! Client core for a two-party chat between site visitors and an admin.
//!
//! The backend is a Supabase project: GoTrue for auth, PostgREST tables for
//! messages, profiles and push tokens, and the realtime socket for inserts.
//! [`services::ChatSession`] keeps one conversation consistent while history,
//! optimistic sends and realtime inserts arrive in any order.

pub mod backend;
pub mod config;
pub mod models;
pub mod services;
