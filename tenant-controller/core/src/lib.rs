#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod budget;
mod fanout;
pub mod naming;
pub mod quantity;
mod retry;

pub use self::{
    budget::Budget,
    fanout::join_first_error,
    quantity::{ParseError as QuantityError, Quantity},
    retry::{retry_on_conflict, Backoff, ConflictError},
};

pub const CONTROLLER_NAME: &str = "capsule.clastix.io/tenant-controller";
