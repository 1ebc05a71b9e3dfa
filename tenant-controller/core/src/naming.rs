//! Names and index keys of the objects replicated into tenant namespaces.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The name of the `index`th replicated object of a tenant.
pub fn object_name(tenant: &str, index: usize) -> String {
    format!("capsule-{}-{}", tenant, index)
}

pub fn role_binding_name(tenant: &str, index: usize, cluster_role: &str) -> String {
    format!("capsule-{}-{}-{}", tenant, index, cluster_role)
}

/// The name of the aggregate quota a pool maintains in each matched namespace.
pub fn pool_quota_name(pool: &str) -> String {
    format!("capsule-pool-{}", pool)
}

/// Computes the label-safe key of a role binding from its cluster role and
/// ordered `(kind, name)` subjects.
///
/// The key is the lowercase hex FNV-1a (64-bit) digest of the cluster role
/// name followed by each subject's kind and name, so it stays stable while the
/// binding's content is unchanged.
pub fn role_binding_key<'a>(
    cluster_role: &str,
    subjects: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut hash = Fnv64a::default();
    hash.write(cluster_role.as_bytes());
    for (kind, name) in subjects {
        hash.write(kind.as_bytes());
        hash.write(name.as_bytes());
    }
    format!("{:x}", hash.finish())
}

struct Fnv64a(u64);

impl Default for Fnv64a {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Fnv64a {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= u64::from(*b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
