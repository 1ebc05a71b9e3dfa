//! Tenant controller index
//!
//! Watches feed the index with every object the controller cares about and
//! the index turns each change into a reconcile [`Request`]:
//!
//! - A `Tenant` or `ResourceQuotaPool` change requests its own reconcile.
//! - A `Namespace` change requests the tenant that owns it (before and after
//!   the change) and every pool whose selectors match its labels.
//! - A change to a replicated object (`NetworkPolicy`, `LimitRange`,
//!   `RoleBinding`, `ResourceQuota`) requests the tenant or pool named by its
//!   labels, so that drift is reverted and quota usage is re-aggregated.
//!
//! ```text
//! [ watch ] -> [ Index ] -> Request -> [ Controller ]
//! ```
//!
//! Deletes only carry a name, so the index remembers which tenant or pool
//! each object belongs to.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
mod metrics;


pub use self::{
    index::{Index, Request, SharedIndex},
    metrics::{IndexMetrics, SizedIndex},
};
