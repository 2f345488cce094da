//! Change log support.
//!
//! This module provides [`ChangeLog`], the persistent LSN-ordered log of every
//! write to the store. The change feed tails it.

mod changelog;

pub use changelog::ChangeLog;
