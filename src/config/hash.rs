//! Declared-resource hashing for change detection.
//!
//! Each declared resource hashes to a hex SHA-256 digest. Tracked state stores
//! the digest of the declaration that produced it; a different digest on the
//! next run means the declaration changed.

use sha2::{Digest, Sha256};

use super::spec::{AppSpec, IpSpec, Manifest, MachineSpec};

/// Hasher for declared resources.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the whole manifest.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();

        for app in &manifest.apps {
            hasher.update(self.hash_app(app).as_bytes());
        }
        for machine in &manifest.machines {
            hasher.update(self.hash_machine(machine).as_bytes());
        }
        for ip in &manifest.ips {
            hasher.update(self.hash_ip(ip).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes an application declaration.
    ///
    /// Region order is not significant.
    #[must_use]
    pub fn hash_app(&self, app: &AppSpec) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, &app.name);
        opt_field(&mut hasher, app.org.as_deref());
        opt_field(&mut hasher, app.network.as_deref());
        opt_field(&mut hasher, app.preferred_region.as_deref());

        let mut regions: Vec<&str> = app.regions.iter().map(String::as_str).collect();
        regions.sort_unstable();
        regions.dedup();
        for region in regions {
            field(&mut hasher, region);
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes a machine declaration.
    #[must_use]
    pub fn hash_machine(&self, machine: &MachineSpec) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, &machine.name);
        field(&mut hasher, &machine.app);
        field(&mut hasher, &machine.image);
        opt_field(&mut hasher, machine.region.as_deref());
        opt_field(&mut hasher, machine.cpus.map(|c| c.to_string()).as_deref());
        opt_field(&mut hasher, machine.memory_mb.map(|m| m.to_string()).as_deref());
        opt_field(&mut hasher, machine.cpu_kind.as_deref());

        hex::encode(hasher.finalize())
    }

    /// Hashes an IP address declaration.
    #[must_use]
    pub fn hash_ip(&self, ip: &IpSpec) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, &ip.name);
        field(&mut hasher, &ip.app);
        field(&mut hasher, &ip.address_type.to_string());
        opt_field(&mut hasher, ip.region.as_deref());

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Length-prefixed so adjacent fields cannot run together.
fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn opt_field(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            field(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}
