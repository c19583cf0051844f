use std::net::{IpAddr, Ipv4Addr};

use code_reloader::{config::HostConfig, AppError};

fn sample_toml(root: &str) -> String {
    format!(
        r#"
source_root = '{root}'
target = "site.index"
extension = "page"
exclude = ["site.vendor", "site.legacy.home"]
http_port = 3000
bind_address = "0.0.0.0"
"#
    )
}

fn minimal_toml(root: &str) -> String {
    format!(
        r#"
source_root = '{root}'
target = "site.index"
"#
    )
}

#[test]
fn parses_full_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let config = HostConfig::from_toml_str(&sample_toml(root)).expect("valid config");

    assert_eq!(config.target, "site.index");
    assert_eq!(config.extension, "page");
    assert_eq!(config.exclude, ["site.vendor", "site.legacy.home"]);
    assert_eq!(config.http_port, 3000);
    assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(
        config.source_root,
        temp.path().canonicalize().expect("canonical")
    );
}

#[test]
fn applies_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let config = HostConfig::from_toml_str(&minimal_toml(root)).expect("valid config");

    assert_eq!(config.extension, "toml");
    assert!(config.exclude.is_empty());
    assert_eq!(config.http_addr().to_string(), "127.0.0.1:8080");
}

#[test]
fn layout_and_exclusions_follow_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let config = HostConfig::from_toml_str(&sample_toml(root)).expect("valid config");

    let layout = config.layout();
    assert_eq!(layout.extension(), "page");
    assert_eq!(
        layout.path_for("site.index").expect("valid name"),
        config.source_root.join("site").join("index.page")
    );

    let exclusions = config.exclusions();
    assert_eq!(exclusions.len(), 2);
    assert!(exclusions.contains("site.vendor"));
    assert!(!exclusions.contains("site.index"));
}

#[test]
fn relative_source_root_resolves_against_config_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(temp.path().join("pages")).expect("mkdir");
    let path = temp.path().join("reloader.toml");
    std::fs::write(
        &path,
        "source_root = \"pages\"\ntarget = \"site.index\"\n",
    )
    .expect("write config");

    let config = HostConfig::load_from_path(&path).expect("valid config");
    assert_eq!(
        config.source_root,
        temp.path().join("pages").canonicalize().expect("canonical")
    );
}

#[test]
fn missing_file_is_a_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = HostConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_missing_source_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("nope");
    let result = HostConfig::from_toml_str(&minimal_toml(root.to_str().expect("utf8")));
    let err = result.expect_err("missing root must fail");
    assert!(err.to_string().contains("source_root"), "{err}");
}

#[test]
fn rejects_file_as_source_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("file.txt");
    std::fs::write(&file, "x").expect("write");
    let result = HostConfig::from_toml_str(&minimal_toml(file.to_str().expect("utf8")));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_invalid_target() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    for target in ["", "site..index", "../etc/passwd", "site/index"] {
        let raw = format!("source_root = '{root}'\ntarget = \"{target}\"\n");
        let result = HostConfig::from_toml_str(&raw);
        assert!(
            matches!(result, Err(AppError::Config(_))),
            "target {target:?} should be rejected"
        );
    }
}

#[test]
fn rejects_dotted_or_pathlike_extension() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    for extension in ["", ".toml", "a/b"] {
        let raw = format!(
            "source_root = '{root}'\ntarget = \"site.index\"\nextension = \"{extension}\"\n"
        );
        assert!(
            HostConfig::from_toml_str(&raw).is_err(),
            "extension {extension:?} should be rejected"
        );
    }
}

#[test]
fn rejects_invalid_exclusion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let raw = format!("source_root = '{root}'\ntarget = \"site.index\"\nexclude = [\"ok.name\", \"bad name\"]\n");
    let err = HostConfig::from_toml_str(&raw).expect_err("invalid exclusion");
    assert!(err.to_string().contains("bad name"), "{err}");
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = HostConfig::from_toml_str("source_root = [").expect_err("malformed");
    assert!(err.to_string().starts_with("config: invalid config"), "{err}");
}

#[test]
fn missing_target_is_a_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let raw = format!("source_root = '{root}'\n");
    assert!(matches!(
        HostConfig::from_toml_str(&raw),
        Err(AppError::Config(_))
    ));
}
