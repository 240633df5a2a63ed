use assert_cmd::Command;

#[test]
fn help_lists_flags() {
    let out = Command::cargo_bin("border0-listen")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for flag in ["--socket-name", "--policy", "--insecure", "--mode"] {
        assert!(text.contains(flag), "missing {flag}");
    }
}

#[test]
fn missing_socket_name_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let out = Command::cargo_bin("border0-listen")
        .unwrap()
        .args(["--config"])
        .arg(dir.path().join("absent.toml"))
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("socket name is required"));
}
