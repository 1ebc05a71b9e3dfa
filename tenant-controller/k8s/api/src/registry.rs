use kube::Resource;

pub const DEFAULT_DOMAIN: &str = "capsule.clastix.io";
pub const DEFAULT_POOL_DOMAIN: &str = "projectcapsule.dev";

/// Maps resource kinds to the label keys the controller stamps on the objects
/// it manages.
///
/// One registry is built at startup and handed to every component; nothing in
/// the controller derives label keys on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registry {
    domain: String,
    pool_domain: String,
}

// === impl Registry ===

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN, DEFAULT_POOL_DOMAIN)
    }
}

impl Registry {
    pub fn new(domain: impl ToString, pool_domain: impl ToString) -> Self {
        Self {
            domain: domain.to_string(),
            pool_domain: pool_domain.to_string(),
        }
    }

    /// The label identifying objects of kind `K`, e.g. `capsule.clastix.io/limit-range`.
    pub fn type_label<K: Resource<DynamicType = ()>>(&self) -> String {
        format!("{}/{}", self.domain, kebab_case(&K::kind(&())))
    }

    /// The label carrying the owning tenant's name.
    pub fn tenant_label(&self) -> String {
        self.type_label::<crate::Tenant>()
    }

    /// The label carrying the owning pool's name.
    pub fn pool_label(&self) -> String {
        format!("{}/pool", self.pool_domain)
    }
}

fn kebab_case(kind: &str) -> String {
    let mut out = String::with_capacity(kind.len() + 4);
    for (i, c) in kind.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
