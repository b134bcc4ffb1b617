//! Configuration loading and precedence tests

use keel_config::loader::{DEFAULT_CACHE_FILE, DEFAULT_DECLARATION_DIR};
use keel_config::{ConfigError, ConfigLoader, DeclarationFile, PackageKind, ProjectConfig};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const KEEL_VARS: &[&str] = &[
    "KEEL_CC",
    "KEEL_OPT",
    "KEEL_STRICT",
    "KEEL_CACHE",
    "KEEL_DECLARATION_PATH",
];

fn clear_env() {
    for var in KEEL_VARS {
        env::remove_var(var);
    }
}

fn write(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

/// Loader with a global config file inside the fixture
fn loader(temp_dir: &TempDir) -> ConfigLoader {
    ConfigLoader::new().with_global_config_path(temp_dir.path().join("home/.keel/config.toml"))
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
#[serial]
fn test_project_overrides_global() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("home/.keel/config.toml"),
        "[defaults]\ncc = \"clang\"\nopt = 1\n",
    );
    let project = temp_dir.path().join("project");
    write(
        &project.join("keel.toml"),
        "[package]\nname = \"imaging\"\n\n[toolchain]\nopt = 2\n",
    );

    let config = loader(&temp_dir).load_from_directory(&project).unwrap();

    assert_eq!(config.compiler(), "clang");
    assert_eq!(config.opt_level(), 2);
}

#[test]
#[serial]
fn test_env_overrides_project_and_global() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("home/.keel/config.toml"),
        "[defaults]\ncc = \"clang\"\n",
    );
    write(
        &temp_dir.path().join("keel.toml"),
        "[toolchain]\ncc = \"icc\"\n\n[configure]\nstrict = false\n",
    );

    env::set_var("KEEL_CC", "gcc-12");
    env::set_var("KEEL_STRICT", "yes");
    env::set_var("KEEL_CACHE", "/tmp/keel-cache.toml");
    let config = loader(&temp_dir).load_from_directory(temp_dir.path());
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.compiler(), "gcc-12");
    assert!(config.strict());
    assert_eq!(config.cache_path(), PathBuf::from("/tmp/keel-cache.toml"));
}

#[rstest]
#[case("1", true)]
#[case("TRUE", true)]
#[case("yes", true)]
#[case("0", false)]
#[case("off", false)]
#[serial]
fn test_strict_env_values(#[case] value: &str, #[case] expected: bool) {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("keel.toml"), "[configure]\nstrict = true\n");

    env::set_var("KEEL_STRICT", value);
    let config = loader(&temp_dir).load_from_directory(temp_dir.path());
    clear_env();

    assert_eq!(config.unwrap().strict(), expected);
}

#[test]
#[serial]
fn test_invalid_global_config_is_ignored() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("home/.keel/config.toml"),
        "[defaults]\nopt = 9\n",
    );
    write(&temp_dir.path().join("keel.toml"), "");

    let config = loader(&temp_dir)
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert_eq!(config.opt_level(), 3);
}

#[test]
#[serial]
fn test_invalid_project_config_is_an_error() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("keel.toml"),
        "[toolchain]\nopt = 4\n",
    );

    let err = loader(&temp_dir)
        .load_from_directory(temp_dir.path())
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

// ============================================================================
// Paths
// ============================================================================

#[test]
#[serial]
fn test_declaration_search_path_order() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("home/.keel/config.toml"),
        "[defaults]\ndeclarations = [\"/opt/keel/declarations\"]\n",
    );
    let project = temp_dir.path().join("project");
    write(
        &project.join("keel.toml"),
        "[configure]\ndeclarations = [\"ups\", \"vendor/decls\"]\n",
    );

    env::set_var("KEEL_DECLARATION_PATH", "/first:/second");
    let config = loader(&temp_dir).load_from_directory(&project);
    clear_env();

    assert_eq!(
        config.unwrap().declaration_paths(),
        vec![
            PathBuf::from("/first"),
            PathBuf::from("/second"),
            project.join("ups"),
            project.join("vendor/decls"),
            PathBuf::from("/opt/keel/declarations"),
        ]
    );
}

#[test]
#[serial]
fn test_default_paths_relative_to_project_root() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("keel.toml"), "[package]\nname = \"app\"\n");
    let nested = temp_dir.path().join("src/module");
    fs::create_dir_all(&nested).unwrap();

    let config = loader(&temp_dir).load_from_directory(&nested).unwrap();

    assert_eq!(
        config.declaration_paths(),
        vec![temp_dir.path().join(DEFAULT_DECLARATION_DIR)]
    );
    assert_eq!(config.cache_path(), temp_dir.path().join(DEFAULT_CACHE_FILE));
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = write(
        &temp_dir.path().join("custom/keel.toml"),
        "[package]\nname = \"fftw-tools\"\nrequired = [\"fftw\"]\n",
    );

    let config = loader(&temp_dir).load_from_file(&path).unwrap();

    assert_eq!(config.package_name(), Some("fftw-tools"));
    assert_eq!(config.project_root(), Some(temp_dir.path().join("custom").as_path()));
}

// ============================================================================
// Validation
// ============================================================================

#[rstest]
#[case("[package]\nname = \"\"\n")]
#[case("[package]\nname = \"app\"\nrequired = [\"app\"]\n")]
#[case("[package]\nname = \"app\"\nrequired = [\"zlib\"]\noptional = [\"zlib\"]\n")]
#[case("[toolchain]\nprobe-timeout = 0\n")]
#[case("[configure]\nparallel = true\n")]
fn test_rejected_project_configs(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    let path = write(&temp_dir.path().join("keel.toml"), content);

    assert!(ProjectConfig::load_from_file(&path).is_err());
}

#[test]
fn test_load_external_declaration() {
    let temp_dir = TempDir::new().unwrap();
    let path = write(
        &temp_dir.path().join("decls/boost-python.toml"),
        r#"
[package]
kind = "external"
version = "1.84"
libs = ["boost_python312"]
python-libs = ["python3.12"]

[dependencies]
required = ["boost"]

[layout]
managed-include-dirs = ["include/boost"]
"#,
    );

    let declaration = DeclarationFile::load_from_file(&path).unwrap();

    assert_eq!(declaration.name(), "boost-python");
    assert_eq!(declaration.package.kind, PackageKind::External);
    assert_eq!(declaration.main_libs(), vec!["boost_python312".to_string()]);
    assert_eq!(declaration.package.python_libs, vec!["python3.12".to_string()]);
    assert_eq!(declaration.dependencies.required, vec!["boost".to_string()]);
    assert_eq!(
        declaration.layout.managed_include_dirs,
        vec![PathBuf::from("include/boost")]
    );
    assert_eq!(declaration.include_dirs(), vec![PathBuf::from("include")]);
}
