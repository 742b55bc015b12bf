//! A work queue of keys with rate-limited admission.
//!
//! Keys are coalesced while they wait: adding a key that is already queued has
//! no effect, and a key that is added while it is being processed is queued
//! again once processing is done. A key is never handed to more than one
//! worker at a time.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod limiter;
mod queue;

pub use self::{limiter::RateLimiter, queue::Queue};
