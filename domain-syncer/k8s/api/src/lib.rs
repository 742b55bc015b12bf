#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod domain;
mod watch;

pub use self::{
    domain::{PolicyDomain, PolicyDomainSpec, PolicyDomainStatus},
    watch::{Event, Watch},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{ConfigMap, Namespace},
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    runtime::watcher,
    Client,
};
