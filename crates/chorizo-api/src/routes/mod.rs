//! # Route Modules
//!
//! - [`entities`]: generic create/read/update/delete for every registered
//!   entity type, behind authentication.
//! - [`health`]: unauthenticated probes.

pub mod entities;
pub mod health;
