use serversync::client::{self, NoProgress};
use serversync::config::{ClientConfig, ServerConfig};
use serversync::index::{scan_directories, FileIndex};
use serversync::server::Server;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Index `root` and serve it on an ephemeral port; returns `host:port`.
async fn start_server(root: &Path, directories: &[&str]) -> String {
    let config = ServerConfig {
        listen: "127.0.0.1:0".to_string(),
        root: root.to_path_buf(),
        directories: directories.iter().map(|d| d.to_string()).collect(),
        ..Default::default()
    };
    let index = FileIndex::load(&config.root, config.directories.clone()).unwrap();
    let server = Server::bind(&config, Arc::new(index)).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    addr
}

fn client_config(addr: String, root: &Path, ignore: &[&str]) -> ClientConfig {
    ClientConfig {
        server: addr,
        root: root.to_path_buf(),
        ignore: ignore.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_basic_scenario() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;

    write(server_dir.path(), "mods/a.jar", "alpha");
    write(server_dir.path(), "mods/b.jar", "bravo");
    write(client_dir.path(), "mods/a.jar", "alpha");
    write(client_dir.path(), "mods/old/c.jar", "charlie");

    let addr = start_server(server_dir.path(), &["mods"]).await;
    let report = client::sync(
        &client_config(addr, client_dir.path(), &[]),
        Arc::new(NoProgress),
    )
    .await?;

    assert_eq!(report.updated, 1);
    assert_eq!(report.deleted, 1);
    assert!(!report.failed);
    assert_eq!(report.directories_pruned, 1);

    assert_eq!(fs::read_to_string(client_dir.path().join("mods/a.jar"))?, "alpha");
    assert_eq!(fs::read_to_string(client_dir.path().join("mods/b.jar"))?, "bravo");
    assert!(!client_dir.path().join("mods/old/c.jar").exists());
    assert!(!client_dir.path().join("mods/old").exists());
    assert!(client_dir.path().join("mods").is_dir());
    Ok(())
}

#[tokio::test]
async fn test_second_run_is_idempotent() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;

    write(server_dir.path(), "mods/a.jar", "alpha");
    write(server_dir.path(), "config/settings.toml", "volume = 3");
    write(client_dir.path(), "config/settings.toml", "volume = 11");

    let addr = start_server(server_dir.path(), &["mods", "config"]).await;
    let config = client_config(addr, client_dir.path(), &[]);

    let first = client::sync(&config, Arc::new(NoProgress)).await?;
    assert_eq!(first.updated, 2);

    let second = client::sync(&config, Arc::new(NoProgress)).await?;
    assert_eq!(second.updated, 0);
    assert_eq!(second.deleted, 0);
    assert!(!second.failed);
    Ok(())
}

#[tokio::test]
async fn test_client_converges_to_server() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;

    write(server_dir.path(), "mods/core.jar", "core");
    write(server_dir.path(), "mods/addons/deep/x.jar", "x");
    write(server_dir.path(), "config/a/b/c.cfg", "c");
    write(server_dir.path(), "config/empty.cfg", "");
    // Outside the managed set on both sides
    write(server_dir.path(), "saves/world.dat", "server world");
    write(client_dir.path(), "saves/world.dat", "client world");

    write(client_dir.path(), "mods/core.jar", "stale core");
    write(client_dir.path(), "mods/extra/one/two.jar", "two");
    write(client_dir.path(), "config/a/b/c.cfg", "c");
    write(client_dir.path(), "config/a/gone.cfg", "gone");

    let addr = start_server(server_dir.path(), &["mods", "config"]).await;
    let report = client::sync(
        &client_config(addr, client_dir.path(), &[]),
        Arc::new(NoProgress),
    )
    .await?;

    assert!(!report.failed);
    assert_eq!(report.deleted, 2);

    let dirs = vec!["mods".to_string(), "config".to_string()];
    assert_eq!(
        scan_directories(client_dir.path(), &dirs),
        scan_directories(server_dir.path(), &dirs)
    );
    assert!(!client_dir.path().join("mods/extra").exists());
    assert_eq!(
        fs::read_to_string(client_dir.path().join("saves/world.dat"))?,
        "client world"
    );
    Ok(())
}

#[tokio::test]
async fn test_ignored_files_survive() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;

    write(server_dir.path(), "mods/a.jar", "alpha");
    write(client_dir.path(), "mods/optifine-1.2.jar", "local");
    write(client_dir.path(), "mods/junk.jar", "junk");
    write(client_dir.path(), "mods/nested/optifine-2.jar", "nested");

    let addr = start_server(server_dir.path(), &["mods"]).await;
    let report = client::sync(
        &client_config(addr, client_dir.path(), &["mods/optifine*.jar"]),
        Arc::new(NoProgress),
    )
    .await?;

    assert_eq!(report.deleted, 2);
    assert_eq!(report.ignored, 1);
    assert!(client_dir.path().join("mods/optifine-1.2.jar").exists());
    assert!(!client_dir.path().join("mods/junk.jar").exists());
    // `*` does not cross directory boundaries
    assert!(!client_dir.path().join("mods/nested").exists());
    Ok(())
}

#[tokio::test]
async fn test_failure_on_both_passes() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;

    write(server_dir.path(), "mods/a.jar", "alpha");
    write(server_dir.path(), "mods/b.jar", "bravo");
    // A directory where the server has a file blocks every write to it
    write(client_dir.path(), "mods/b.jar/keep.txt", "blocker");
    write(client_dir.path(), "mods/stale.jar", "stale");

    let addr = start_server(server_dir.path(), &["mods"]).await;
    let report = client::sync(
        &client_config(addr, client_dir.path(), &["mods/b.jar/*"]),
        Arc::new(NoProgress),
    )
    .await?;

    assert!(report.failed);
    assert_eq!(report.updated, 1);
    // Deletion still runs after a failed run
    assert_eq!(report.deleted, 1);
    assert!(!client_dir.path().join("mods/stale.jar").exists());
    assert_eq!(fs::read_to_string(client_dir.path().join("mods/a.jar"))?, "alpha");
    assert_eq!(
        fs::read_to_string(client_dir.path().join("mods/b.jar/keep.txt"))?,
        "blocker"
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_server_deletes_everything() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;
    fs::create_dir_all(server_dir.path().join("mods"))?;
    write(client_dir.path(), "mods/a.jar", "alpha");
    write(client_dir.path(), "mods/sub/b.jar", "bravo");

    let addr = start_server(server_dir.path(), &["mods"]).await;
    let report = client::sync(
        &client_config(addr, client_dir.path(), &[]),
        Arc::new(NoProgress),
    )
    .await?;

    assert_eq!(report.updated, 0);
    assert_eq!(report.deleted, 2);
    assert!(client_dir.path().join("mods").is_dir());
    assert_eq!(fs::read_dir(client_dir.path().join("mods"))?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_managed_directory_created() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;
    write(server_dir.path(), "mods/a.jar", "alpha");
    fs::create_dir_all(server_dir.path().join("config"))?;

    let addr = start_server(server_dir.path(), &["mods", "config"]).await;
    let report = client::sync(
        &client_config(addr, client_dir.path(), &[]),
        Arc::new(NoProgress),
    )
    .await?;

    assert_eq!(report.updated, 1);
    assert!(client_dir.path().join("config").is_dir());
    assert!(client_dir.path().join("mods/a.jar").is_file());
    Ok(())
}

#[tokio::test]
async fn test_progress_reported_per_file() -> anyhow::Result<()> {
    let server_dir = TempDir::new()?;
    let client_dir = TempDir::new()?;
    for i in 0..4 {
        write(server_dir.path(), &format!("mods/{i}.jar"), "data");
    }

    let addr = start_server(server_dir.path(), &["mods"]).await;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |percent: u8, _label: &str| seen.lock().unwrap().push(percent)
    };
    client::sync(&client_config(addr, client_dir.path(), &[]), Arc::new(sink)).await?;

    assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_touches_nothing() {
    let client_dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = client::sync(
        &client_config(addr, client_dir.path(), &[]),
        Arc::new(NoProgress),
    )
    .await;

    assert!(matches!(
        result,
        Err(serversync::SyncError::Connection { .. })
    ));
    assert!(!client_dir.path().join("mods").exists());
}
