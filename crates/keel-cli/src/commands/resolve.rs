//! Resolve command - print the configuration order without probing

use super::load_project;
use anyhow::{Context, Result};
use keel_build::Resolver;
use std::path::Path;

/// Resolve the project's dependencies and print the order
pub fn run(project_dir: Option<&Path>, json: bool) -> Result<()> {
    let project = load_project(project_dir)?;
    let resolution = Resolver::new(&project.registry)
        .resolve(std::slice::from_ref(&project.primary))
        .context("Dependency resolution failed")?;

    if json {
        let order: Vec<_> = resolution
            .order
            .iter()
            .map(|node| {
                serde_json::json!({
                    "name": node.name,
                    "requirement": node.requirement.name(),
                    "primary": node.primary,
                    "dependent": node.dependent,
                })
            })
            .collect();
        let errors: Vec<_> = resolution
            .errors
            .iter()
            .map(|e| {
                serde_json::json!({
                    "package": e.package(),
                    "dependency": e.dependency(),
                    "fatal": e.is_fatal(),
                    "message": e.to_string(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "order": order,
                "errors": errors,
            }))?
        );
    } else {
        for (i, node) in resolution.order.iter().enumerate() {
            let mut line = format!("{:>3}. {} ({})", i + 1, node.name, node.requirement.name());
            if let Some(dependent) = &node.dependent {
                line.push_str(&format!(", needed by {}", dependent));
            }
            println!("{}", line);
        }
        for error in &resolution.errors {
            let label = if error.is_fatal() { "error" } else { "warning" };
            eprintln!("{}: {}", label, error);
        }
    }

    if resolution.is_fatal() {
        anyhow::bail!("Required dependencies are not declared");
    }
    Ok(())
}
