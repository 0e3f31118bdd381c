use std::process::Command;
use tempfile::TempDir;

/// Runs with `home` as HOME so a developer's own config file stays out of the way.
fn serversync(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_serversync"));
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"));
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    let output = serversync(&home).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("server"));
    assert!(stdout.contains("client"));
}

#[test]
fn test_client_unreachable_server_fails() {
    let root = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let output = serversync(&root)
        .args(["client", "--quiet", "--server", &addr, "--root"])
        .arg(root.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!root.path().join("mods").exists());
}

#[test]
fn test_bad_config_file_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[client\n").unwrap();

    let output = serversync(&tmp)
        .arg("--config")
        .arg(&path)
        .arg("client")
        .output()
        .unwrap();

    assert!(!output.status.success());
}
