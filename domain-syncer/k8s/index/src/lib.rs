//! Domain syncer indexes
//!
//! The syncer keeps two indexes, both populated from cluster watches:
//!
//! - The set of live `Namespace` names. Each namespace maps to a policy domain
//!   that must be mirrored.
//! - Every mirrored `PolicyDomain`, keyed by name, with a secondary index from
//!   each trust target to the domains whose roles delegate to it.
//!
//! A domain that is a trust target of a mirrored domain must itself be
//! mirrored, so that delegated role membership can be resolved locally. Both
//! indexes are read synchronously by the controller; only the [`Store`] issues
//! writes against the API server, and it writes its results through to the
//! domain index so that later reads never lag behind the controller's own
//! writes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod api;
mod domains;
pub mod metrics;
mod namespaces;
mod store;


pub use self::{
    api::{DomainApi, Error},
    domains::{DomainIndex, NotIndexed},
    namespaces::NamespaceIndex,
    store::{Applied, Store},
};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedDomains = Arc<RwLock<DomainIndex>>;

pub type SharedNamespaces = Arc<RwLock<NamespaceIndex>>;
