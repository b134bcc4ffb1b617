//! Fingerprint of the inputs of a configuration pass
//!
//! Covers everything that decides which checks run and which flags come out,
//! apart from the compiler identity and optimization level, which the cache
//! entry records separately.

use crate::adapter::{ConfigurationAdapter, ConfigureOptions};
use crate::package::PackageDeclaration;
use crate::registry::Registry;
use crate::resolver::Resolution;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Inputs hashed into a fingerprint
pub struct FingerprintInputs<'a> {
    pub primaries: &'a [PackageDeclaration],
    pub resolution: &'a Resolution,
    pub registry: &'a Registry,
    pub options: ConfigureOptions,
    pub managed_layout: bool,
}

/// Compute the fingerprint of a configuration pass
pub fn compute_fingerprint(inputs: &FingerprintInputs<'_>) -> String {
    let mut hasher = FieldHasher::new();

    hasher.field("attempt-build", &inputs.options.attempt_build.to_string());
    hasher.field("managed-layout", &inputs.managed_layout.to_string());

    for primary in inputs.primaries {
        hasher.field("primary", primary.name());
        hasher.path("root", primary.root());
        for dep in primary.required() {
            hasher.field("required", dep.name());
        }
        for dep in primary.optional() {
            hasher.field("optional", dep.name());
        }
    }

    for node in &inputs.resolution.order {
        hasher.field("node", &node.name);
        hasher.field("requirement", node.requirement.name());
        if let Some(adapter) = inputs.registry.adapter(&node.name) {
            hash_adapter(&mut hasher, adapter, inputs.managed_layout);
        }
    }

    hasher.finish()
}

fn hash_adapter(hasher: &mut FieldHasher, adapter: &ConfigurationAdapter, managed_layout: bool) {
    hasher.field("identity", &adapter.identity());
    hasher.path("root", adapter.root());
    for header in adapter.headers() {
        hasher.field("header", header);
    }
    for lib in adapter.libs() {
        hasher.field("lib", lib);
    }
    for lib in adapter.python_libs() {
        hasher.field("python-lib", lib);
    }
    for lib in adapter.test_libs() {
        hasher.field("test-lib", lib);
    }

    let include_dirs = if managed_layout && !adapter.managed_include_dirs().is_empty() {
        adapter.managed_include_dirs()
    } else {
        adapter.include_dirs()
    };
    // Only existing directories are contributed, so their presence is an input
    for dir in include_dirs {
        let path = adapter.root().join(dir);
        hasher.path("include-dir", &path);
        hasher.field("exists", &path.is_dir().to_string());
    }
    for dir in adapter.lib_dirs() {
        let path = adapter.root().join(dir);
        hasher.path("lib-dir", &path);
        hasher.field("exists", &path.is_dir().to_string());
    }

    for (name, value) in adapter.defines() {
        hasher.field("define", &format!("{}={}", name, value));
    }
}

/// SHA-256 over length-prefixed key/value fields
struct FieldHasher {
    hasher: Sha256,
}

impl FieldHasher {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn field(&mut self, key: &str, value: &str) {
        for part in [key, value] {
            self.hasher.update((part.len() as u64).to_le_bytes());
            self.hasher.update(part.as_bytes());
        }
    }

    fn path(&mut self, key: &str, path: &Path) {
        self.field(key, &path.to_string_lossy());
    }

    fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}
