//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work across the crate.

pub mod appointment;
pub mod audit;
pub mod availability;
pub mod business_hours;
pub mod location;
pub mod staff;
pub mod transaction;

pub use self::appointment::*;
pub use self::audit::*;
pub use self::availability::*;
pub use self::business_hours::*;
pub use self::location::*;
pub use self::staff::*;
pub use self::transaction::*;
