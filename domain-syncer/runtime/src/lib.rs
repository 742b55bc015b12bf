#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod controller;
mod cursor;
mod duration;
mod metrics;
mod poll;


pub use self::{
    args::Args,
    controller::{Config, Controller, SyncError},
    cursor::{ConfigMapCursor, CursorSink},
    duration::{GoDuration, ParseError},
    metrics::{ControllerMetrics, Outcome},
    poll::Poller,
};
pub use domain_syncer_client as client;
pub use domain_syncer_core as core;
pub use domain_syncer_k8s_api as k8s;
pub use domain_syncer_k8s_index as index;
pub use domain_syncer_queue as queue;
