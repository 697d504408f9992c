//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is alive.
//!
//! # Tasks
//! - Expiration sweep: prunes expired entries at the configured interval

mod sweeper;

pub use sweeper::ExpirationSweeper;
