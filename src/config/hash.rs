//! Resource fingerprints for change detection.
//!
//! This module provides deterministic hashing of resource attributes so the
//! planner can tell whether a recorded resource matches its declaration.

use sha2::{Digest, Sha256};

use super::spec::{AppConfig, LinkConfig, Manifest, ServiceConfig};

/// Hasher for computing resource fingerprints.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash over every resource of the manifest.
    ///
    /// Provider and state settings are not part of the fingerprint.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();

        // Maps are ordered by logical key.
        for (key, app) in &manifest.apps {
            field(&mut hasher, key);
            field(&mut hasher, &self.hash_app(app));
        }
        for (key, service) in &manifest.services {
            field(&mut hasher, key);
            field(&mut hasher, &self.hash_service(service));
        }
        for (key, link) in &manifest.links {
            field(&mut hasher, key);
            field(&mut hasher, &self.hash_link(link));
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the fingerprint of an application.
    #[must_use]
    pub fn hash_app(&self, app: &AppConfig) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, "app");
        field(&mut hasher, &app.name);
        hasher.update([u8::from(app.locked)]);

        for (key, value) in &app.config_vars {
            field(&mut hasher, key);
            field(&mut hasher, value);
        }

        // Unset domains differ from an explicitly empty set.
        match &app.domains {
            None => hasher.update([0u8]),
            Some(domains) => {
                hasher.update([1u8]);
                for domain in domains {
                    field(&mut hasher, domain);
                }
            }
        }

        // Buildpack order is significant.
        hasher.update((app.buildpacks.len() as u64).to_be_bytes());
        for buildpack in &app.buildpacks {
            field(&mut hasher, buildpack);
        }

        hasher.update((app.ports.len() as u64).to_be_bytes());
        for port in &app.ports {
            field(&mut hasher, port);
        }

        field(&mut hasher, &app.nginx_bind_address_ipv4);
        field(&mut hasher, &app.nginx_bind_address_ipv6);

        hex::encode(hasher.finalize())
    }

    /// Computes the fingerprint of a service.
    #[must_use]
    pub fn hash_service(&self, service: &ServiceConfig) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, "service");
        field(&mut hasher, &service.name);
        field(&mut hasher, &service.family.to_string());
        optional(&mut hasher, service.image.as_deref());
        optional(&mut hasher, service.image_version.as_deref());
        hasher.update([u8::from(service.stopped)]);
        optional(&mut hasher, service.expose_on.as_deref());
        optional(&mut hasher, service.password.as_deref());
        optional(&mut hasher, service.root_password.as_deref());

        hex::encode(hasher.finalize())
    }

    /// Computes the fingerprint of a service link.
    #[must_use]
    pub fn hash_link(&self, link: &LinkConfig) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, "link");
        field(&mut hasher, &link.family.to_string());
        field(&mut hasher, &link.service);
        field(&mut hasher, &link.app);
        optional(&mut hasher, link.alias.as_deref());
        optional(&mut hasher, link.query_string.as_deref());

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        // Constant-time over equal lengths.
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

/// Feeds a length-prefixed string so adjacent fields cannot run together.
fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        None => hasher.update([0u8]),
        Some(v) => {
            hasher.update([1u8]);
            field(hasher, v);
        }
    }
}
