use ahash::AHashSet as HashSet;

/// Maps cluster namespaces to policy domains and back.
///
/// Dots in a domain become dashes in a namespace and dashes become double
/// dashes, so `k8s.athenz-istio-auth` maps to `k8s-athenz--istio--auth`.
///
/// System namespaces are the exception: they map to subdomains of the admin
/// domain (`kube-system` -> `<admin>.kube-system`). The reverse mapping only
/// recognizes these by membership in the configured list, so it cannot be
/// derived from the escaping rule.
#[derive(Clone, Debug, Default)]
pub struct NameMapper {
    admin_domain: Option<String>,
    system_namespaces: Vec<String>,
    excluded_namespaces: HashSet<String>,
}

// === impl NameMapper ===

impl NameMapper {
    pub fn new<S, E>(admin_domain: impl Into<String>, system_namespaces: S, excluded: E) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let admin_domain = Some(admin_domain.into()).filter(|d| !d.is_empty());
        let system_namespaces = system_namespaces
            .into_iter()
            .map(Into::into)
            .filter(|ns: &String| !ns.is_empty())
            .collect();
        let excluded_namespaces = excluded
            .into_iter()
            .map(Into::into)
            .filter(|ns: &String| !ns.is_empty())
            .collect();
        Self {
            admin_domain,
            system_namespaces,
            excluded_namespaces,
        }
    }

    pub fn namespace_to_domain(&self, ns: &str) -> String {
        if let Some(admin) = self.admin_domain.as_deref() {
            if self.is_system_namespace(ns) {
                return format!("{admin}.{ns}");
            }
        }
        ns.replace('-', ".").replace("..", "-")
    }

    pub fn domain_to_namespace(&self, domain: &str) -> String {
        if let Some(ns) = self.system_namespace_of(domain) {
            return ns.to_string();
        }
        domain.replace('-', "--").replace('.', "-")
    }

    pub fn admin_domain(&self) -> Option<&str> {
        self.admin_domain.as_deref()
    }

    pub fn is_admin_domain(&self, domain: &str) -> bool {
        self.admin_domain.as_deref() == Some(domain)
    }

    pub fn is_system_namespace(&self, ns: &str) -> bool {
        self.system_namespaces.iter().any(|s| s == ns)
    }

    /// Tests whether `domain` is the domain of a system namespace that is not
    /// excluded.
    pub fn is_system_domain(&self, domain: &str) -> bool {
        self.system_namespace_of(domain)
            .is_some_and(|ns| !self.is_excluded(ns))
    }

    /// Lists the domains of all system namespaces that are not excluded.
    pub fn system_domains(&self) -> Vec<String> {
        let Some(admin) = self.admin_domain.as_deref() else {
            return Vec::new();
        };
        self.system_namespaces
            .iter()
            .filter(|ns| !self.is_excluded(ns))
            .map(|ns| format!("{admin}.{ns}"))
            .collect()
    }

    /// Excluded namespaces are never synced, whatever domain they map to.
    pub fn is_excluded(&self, ns: &str) -> bool {
        self.excluded_namespaces.contains(ns)
    }

    fn system_namespace_of(&self, domain: &str) -> Option<&str> {
        let admin = self.admin_domain.as_deref()?;
        let ns = domain.strip_prefix(admin)?.strip_prefix('.')?;
        self.system_namespaces
            .iter()
            .find(|s| *s == ns)
            .map(String::as_str)
    }
}
