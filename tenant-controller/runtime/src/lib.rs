#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use tenant_controller_core as core;
pub use tenant_controller_k8s_api as k8s;
pub use tenant_controller_k8s_index as index;
pub use tenant_controller_k8s_sync as sync;

mod args;
mod controller;
mod lease;

pub use self::{
    args::Args,
    controller::{Controller, ControllerMetrics, Reconcile, Reconcilers},
};
