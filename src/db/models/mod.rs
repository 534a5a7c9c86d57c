//! Database models split into domain-specific modules.
//!
//! Types are re-exported at this level so callers can use `crate::db::Bill`.

pub mod bill;
pub mod common;
pub mod contribution;
pub mod expense;
pub mod feedback;
pub mod household;
pub mod notification;
pub mod user;

pub use bill::*;
pub use common::*;
pub use contribution::*;
pub use expense::*;
pub use feedback::*;
pub use household::*;
pub use notification::*;
pub use user::*;
