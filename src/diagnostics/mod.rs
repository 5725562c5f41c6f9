//! Local JSON endpoints for operators: status, manual sync, connection test
//! and token registration.

pub mod server;

pub use server::serve;
