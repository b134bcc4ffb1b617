//! Dependency graph resolution
//!
//! Computes the configuration order for a set of package declarations with a
//! depth-first topological sort. Dependencies are visited in declaration
//! order, so identical inputs always give identical orders.
//!
//! Only `required` edges constrain the order and only they can form a cycle.
//! An optional dependency that leads back to a package still being resolved
//! is retried once that package is done, and ignored if it still cannot be
//! placed.

use crate::error::{BuildError, BuildResult};
use crate::package::{PackageDeclaration, Requirement};
use crate::registry::Registry;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::debug;

/// One package in the resolved order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub name: String,
    /// `Required` when reachable from a primary through required edges only
    pub requirement: Requirement,
    /// Whether this is one of the packages being built
    pub primary: bool,
    /// First package that depends on this one
    pub dependent: Option<String>,
}

/// Non-structural resolution problem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Package '{package}' requires '{dependency}', which is not declared")]
    MissingRequiredDependency { package: String, dependency: String },

    #[error("Optional dependency '{dependency}' of '{package}' is not declared; continuing without it")]
    MissingOptionalDependency { package: String, dependency: String },

    #[error("Optional package '{package}' is skipped: its required dependency '{dependency}' is not declared")]
    UnavailableOptionalPackage { package: String, dependency: String },
}

impl ResolutionError {
    /// Check whether this error prevents configuration
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingRequiredDependency { .. })
    }

    /// Package whose dependency is missing
    pub fn package(&self) -> &str {
        match self {
            Self::MissingRequiredDependency { package, .. }
            | Self::MissingOptionalDependency { package, .. }
            | Self::UnavailableOptionalPackage { package, .. } => package,
        }
    }

    /// Missing dependency
    pub fn dependency(&self) -> &str {
        match self {
            Self::MissingRequiredDependency { dependency, .. }
            | Self::MissingOptionalDependency { dependency, .. }
            | Self::UnavailableOptionalPackage { dependency, .. } => dependency,
        }
    }
}

/// Result of resolving a set of declarations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub order: Vec<ResolvedNode>,
    pub errors: Vec<ResolutionError>,
}

impl Resolution {
    /// Names in configuration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|n| n.name.as_str()).collect()
    }

    /// Get a node by name
    pub fn get(&self, name: &str) -> Option<&ResolvedNode> {
        self.order.iter().find(|n| n.name == name)
    }

    /// Position of a name in the order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n.name == name)
    }

    /// Errors that prevent configuration
    pub fn fatal_errors(&self) -> impl Iterator<Item = &ResolutionError> {
        self.errors.iter().filter(|e| e.is_fatal())
    }

    /// Errors reported as warnings only
    pub fn warnings(&self) -> impl Iterator<Item = &ResolutionError> {
        self.errors.iter().filter(|e| !e.is_fatal())
    }

    /// Check whether any error is fatal
    pub fn is_fatal(&self) -> bool {
        self.fatal_errors().next().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Resolved,
    Unavailable,
    /// Depends on a package still on the active path through an optional edge
    Deferred,
}

/// DFS state of one resolution
#[derive(Default)]
struct Walk {
    states: HashMap<String, bool>,
    path: Vec<(String, Requirement)>,
    order: Vec<String>,
    required_by: HashMap<String, String>,
    wanted_by: HashMap<String, String>,
    failures: Vec<(String, String, Requirement)>,
}

/// Resolves declarations against a registry
pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over a registry
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolve the configuration order for the given primary packages
    ///
    /// Returns `CycleDetected` as soon as a cycle of required edges is found,
    /// with no partial order. Missing dependencies are reported in
    /// [`Resolution::errors`].
    pub fn resolve(&self, declarations: &[PackageDeclaration]) -> BuildResult<Resolution> {
        let mut roots: HashMap<&str, &PackageDeclaration> = HashMap::new();
        for declaration in declarations {
            roots.entry(declaration.name()).or_insert(declaration);
        }

        let mut walk = Walk::default();
        for declaration in declarations {
            self.visit(declaration.name(), Requirement::Required, &roots, &mut walk)?;
        }

        let closure = self.required_closure(declarations, &roots);

        let order = walk
            .order
            .iter()
            .map(|name| ResolvedNode {
                name: name.clone(),
                requirement: if closure.contains(name.as_str()) {
                    Requirement::Required
                } else {
                    Requirement::Optional
                },
                primary: roots.contains_key(name.as_str()),
                dependent: walk
                    .required_by
                    .get(name)
                    .or_else(|| walk.wanted_by.get(name))
                    .cloned(),
            })
            .collect();

        let errors = walk
            .failures
            .into_iter()
            .map(|(package, dependency, edge)| match edge {
                Requirement::Optional => {
                    ResolutionError::MissingOptionalDependency { package, dependency }
                }
                Requirement::Required if closure.contains(package.as_str()) => {
                    ResolutionError::MissingRequiredDependency { package, dependency }
                }
                Requirement::Required => {
                    ResolutionError::UnavailableOptionalPackage { package, dependency }
                }
            })
            .collect();

        Ok(Resolution { order, errors })
    }

    fn lookup<'b>(
        &'b self,
        name: &str,
        roots: &HashMap<&str, &'b PackageDeclaration>,
    ) -> Option<&'b PackageDeclaration> {
        roots
            .get(name)
            .copied()
            .or_else(|| self.registry.declaration(name))
    }

    fn visit(
        &self,
        name: &str,
        edge: Requirement,
        roots: &HashMap<&str, &PackageDeclaration>,
        walk: &mut Walk,
    ) -> BuildResult<Visit> {
        if let Some(start) = walk.path.iter().position(|(n, _)| n == name) {
            let all_required = edge == Requirement::Required
                && walk.path[start + 1..]
                    .iter()
                    .all(|(_, e)| *e == Requirement::Required);
            if all_required {
                let mut cycle: Vec<String> =
                    walk.path[start..].iter().map(|(n, _)| n.clone()).collect();
                cycle.push(name.to_string());
                return Err(BuildError::CycleDetected { cycle });
            }
            return Ok(Visit::Deferred);
        }

        if let Some(&resolved) = walk.states.get(name) {
            return Ok(if resolved {
                Visit::Resolved
            } else {
                Visit::Unavailable
            });
        }

        let Some(declaration) = self.lookup(name, roots) else {
            walk.states.insert(name.to_string(), false);
            return Ok(Visit::Unavailable);
        };

        walk.path.push((name.to_string(), edge));
        let mut outcome = Visit::Resolved;

        for dep in declaration.required() {
            walk.required_by
                .entry(dep.name().to_string())
                .or_insert_with(|| name.to_string());
            match self.visit(dep.name(), Requirement::Required, roots, walk)? {
                Visit::Resolved => {}
                Visit::Unavailable => {
                    walk.failures.push((
                        name.to_string(),
                        dep.name().to_string(),
                        Requirement::Required,
                    ));
                    outcome = Visit::Unavailable;
                    break;
                }
                Visit::Deferred => {
                    outcome = Visit::Deferred;
                    break;
                }
            }
        }

        let mut deferred = Vec::new();
        if outcome == Visit::Resolved {
            for dep in declaration.optional() {
                walk.wanted_by
                    .entry(dep.name().to_string())
                    .or_insert_with(|| name.to_string());
                match self.visit(dep.name(), Requirement::Optional, roots, walk)? {
                    Visit::Resolved => {}
                    Visit::Unavailable => walk.failures.push((
                        name.to_string(),
                        dep.name().to_string(),
                        Requirement::Optional,
                    )),
                    Visit::Deferred => deferred.push(dep.name()),
                }
            }
        }

        walk.path.pop();

        match outcome {
            Visit::Resolved => {
                walk.states.insert(name.to_string(), true);
                walk.order.push(name.to_string());
                for dep in deferred {
                    match self.visit(dep, Requirement::Optional, roots, walk)? {
                        Visit::Resolved => {}
                        Visit::Unavailable => walk.failures.push((
                            name.to_string(),
                            dep.to_string(),
                            Requirement::Optional,
                        )),
                        Visit::Deferred => debug!(
                            "Ignoring optional dependency '{}' of '{}': it depends on a package still being resolved",
                            dep, name
                        ),
                    }
                }
            }
            Visit::Unavailable => {
                walk.states.insert(name.to_string(), false);
            }
            Visit::Deferred => {}
        }

        Ok(outcome)
    }

    /// Names reachable from the primaries through required edges only
    fn required_closure<'b>(
        &'b self,
        declarations: &'b [PackageDeclaration],
        roots: &HashMap<&str, &'b PackageDeclaration>,
    ) -> HashSet<&'b str> {
        let mut closure: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&PackageDeclaration> = VecDeque::new();

        for declaration in declarations {
            if closure.insert(declaration.name()) {
                queue.push_back(declaration);
            }
        }

        while let Some(declaration) = queue.pop_front() {
            for dep in declaration.required() {
                if let Some(next) = self.lookup(dep.name(), roots) {
                    if closure.insert(next.name()) {
                        queue.push_back(next);
                    }
                }
            }
        }

        closure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ConfigurationAdapter;
    use pretty_assertions::assert_eq;

    fn registry(packages: &[(&str, &[&str], &[&str])]) -> Registry {
        let mut registry = Registry::new();
        for (name, required, optional) in packages {
            registry
                .register_adapter(
                    ConfigurationAdapter::new(*name, format!("/opt/{}", name)),
                    required,
                    optional,
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_empty_input() {
        let registry = Registry::new();
        let resolution = Resolver::new(&registry).resolve(&[]).unwrap();
        assert!(resolution.order.is_empty());
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_linear_chain() {
        let registry = registry(&[("b", &["c"], &[]), ("c", &[], &[])]);
        let root = PackageDeclaration::new("a", "/src/a").requires("b");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert_eq!(resolution.names(), vec!["c", "b", "a"]);
        assert!(resolution.order.iter().all(|n| n.requirement == Requirement::Required));
        assert!(resolution.get("a").unwrap().primary);
        assert_eq!(resolution.get("c").unwrap().dependent.as_deref(), Some("b"));
    }

    #[test]
    fn test_declaration_order_tie_break() {
        let registry = registry(&[
            ("zlib", &[], &[]),
            ("boost", &[], &[]),
            ("fftw", &[], &[]),
        ]);
        let root = PackageDeclaration::new("app", "/src/app")
            .requires("zlib")
            .requires("boost")
            .requires("fftw");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert_eq!(resolution.names(), vec!["zlib", "boost", "fftw", "app"]);
    }

    #[test]
    fn test_diamond_configured_once() {
        let registry = registry(&[
            ("left", &["base"], &[]),
            ("right", &["base"], &[]),
            ("base", &[], &[]),
        ]);
        let root = PackageDeclaration::new("app", "/src/app")
            .requires("left")
            .requires("right");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert_eq!(resolution.names(), vec!["base", "left", "right", "app"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let registry = Registry::new();
        let a = PackageDeclaration::new("a", "/src/a").requires("b");
        let b = PackageDeclaration::new("b", "/src/b").requires("a");

        let err = Resolver::new(&registry).resolve(&[a, b]).unwrap_err();
        match err {
            BuildError::CycleDetected { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_through_registry() {
        let registry = registry(&[("x", &["y"], &[]), ("y", &["z"], &[]), ("z", &["x"], &[])]);
        let root = PackageDeclaration::new("app", "/src/app").requires("x");

        let err = Resolver::new(&registry).resolve(&[root]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: x -> y -> z -> x"
        );
    }

    #[test]
    fn test_missing_required_is_fatal() {
        let registry = registry(&[("b", &["ghost"], &[])]);
        let root = PackageDeclaration::new("a", "/src/a").requires("b");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert!(resolution.is_fatal());
        assert_eq!(
            resolution.errors,
            vec![
                ResolutionError::MissingRequiredDependency {
                    package: "b".to_string(),
                    dependency: "ghost".to_string(),
                },
                ResolutionError::MissingRequiredDependency {
                    package: "a".to_string(),
                    dependency: "b".to_string(),
                },
            ]
        );
        assert!(resolution.order.is_empty());
    }

    #[test]
    fn test_missing_optional_is_dropped() {
        let registry = registry(&[("boost", &[], &[])]);
        let root = PackageDeclaration::new("app", "/src/app")
            .requires("boost")
            .optionally("eigen");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert!(!resolution.is_fatal());
        assert_eq!(resolution.names(), vec!["boost", "app"]);
        assert_eq!(
            resolution.warnings().collect::<Vec<_>>(),
            vec![&ResolutionError::MissingOptionalDependency {
                package: "app".to_string(),
                dependency: "eigen".to_string(),
            }]
        );
    }

    #[test]
    fn test_optional_package_with_missing_requirement() {
        let registry = registry(&[("mkl", &["license"], &[])]);
        let root = PackageDeclaration::new("app", "/src/app").optionally("mkl");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert!(!resolution.is_fatal());
        assert_eq!(resolution.names(), vec!["app"]);
        assert!(resolution.errors.contains(&ResolutionError::UnavailableOptionalPackage {
            package: "mkl".to_string(),
            dependency: "license".to_string(),
        }));
    }

    #[test]
    fn test_optional_subtree_classified_optional() {
        let registry = registry(&[("plot", &["png"], &[]), ("png", &[], &[])]);
        let root = PackageDeclaration::new("app", "/src/app").optionally("plot");

        let resolution = Resolver::new(&registry).resolve(&[root]).unwrap();
        assert_eq!(resolution.names(), vec!["png", "plot", "app"]);
        assert_eq!(resolution.get("png").unwrap().requirement, Requirement::Optional);
        assert_eq!(resolution.get("plot").unwrap().requirement, Requirement::Optional);
        assert_eq!(resolution.get("app").unwrap().requirement, Requirement::Required);
    }

    #[test]
    fn test_optional_back_edge_is_not_a_cycle() {
        // a optionally uses b, b requires a: b is placed after a
        let registry = registry(&[("b", &["a"], &[])]);
        let a = PackageDeclaration::new("a", "/src/a").optionally("b");

        let resolution = Resolver::new(&registry).resolve(&[a]).unwrap();
        assert_eq!(resolution.names(), vec!["a", "b"]);
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_optional_edge_to_ancestor_ignored() {
        let registry = registry(&[("b", &[], &["a"])]);
        let a = PackageDeclaration::new("a", "/src/a").requires("b");

        let resolution = Resolver::new(&registry).resolve(&[a]).unwrap();
        assert_eq!(resolution.names(), vec!["b", "a"]);
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let registry = registry(&[
            ("b", &["d"], &["c"]),
            ("c", &["d"], &[]),
            ("d", &[], &[]),
        ]);
        let roots = vec![PackageDeclaration::new("a", "/src/a").requires("b")];
        let resolver = Resolver::new(&registry);

        let first = resolver.resolve(&roots).unwrap();
        for _ in 0..5 {
            assert_eq!(resolver.resolve(&roots).unwrap(), first);
        }
    }
}
