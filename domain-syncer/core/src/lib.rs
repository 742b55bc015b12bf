//! Core types for mirroring policy domains into a cluster.
//!
//! A policy domain is a named container of roles and policies owned by an
//! external policy service. The syncer keeps a read-only copy of each relevant
//! domain in the cluster so that authorization decisions can be made locally.
//! This crate holds the pieces that are independent of Kubernetes: the signed
//! domain model, the namespace/domain name mapping, one-hop trust resolution,
//! and the interface to the policy service.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod client;
pub mod domain;
mod msd;
mod names;
pub mod trust;

pub use self::{
    client::{ChangedDomains, ClientError, DomainClient},
    domain::{
        Assertion, AssertionEffect, DomainData, DomainPolicies, Policy, Role, RoleMember,
        SignedDomain, SignedPolicies,
    },
    msd::filter_msd_rules,
    names::NameMapper,
};
