//! End-to-end provisioning tests against the public API.
//!
//! These exercise the descriptor-file-to-container-tree path the CLI takes,
//! without touching the engine binaries or the network.

use std::fs;

use anyhow::Result;
use procbox::config::ProcessSpec;
use procbox::engine::{Dialect, EngineVersion};
use procbox::management::image::NoBaseImage;
use procbox::management::lifecycle;
use procbox::management::provision::Provisioner;
use procbox::utils::path::RunnerRoot;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn write_descriptor(dir: &std::path::Path) -> Result<std::path::PathBuf> {
    let path = dir.join("myapp-web.yaml");
    fs::write(
        &path,
        r#"
app_name: myapp
proc_name: web
port: 8000
release_hash: deadbeef
version: "1.2.3"
config_name: prod
cmd: python run.py
user: nobody
group: nogroup
host: worker1.example.com
env:
  DEBUG: "false"
settings:
  DATABASE_URL: postgres://db/myapp
"#,
    )?;
    Ok(path)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_descriptor_file_provisions_full_container_tree() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = RunnerRoot::new(dir.path());
    let descriptor = write_descriptor(dir.path())?;

    let spec = ProcessSpec::load(&descriptor)?;

    let dialect = Dialect::for_version(&EngineVersion::new(1, 0, 8));
    let provisioner = Provisioner::new(&spec, &root, dialect, Box::new(NoBaseImage));
    provisioner.setup().await?;

    let paths = provisioner.paths();
    assert_eq!(
        provisioner.container_name(),
        "myapp-1.2.3-prod-deadbeef-web-8000"
    );
    assert!(paths.container_path.join("proc.sh").exists());
    assert!(paths.container_path.join("env.sh").exists());
    assert!(paths.container_path.join("settings.yaml").exists());
    assert!(paths.work_path.is_dir());

    let rendered = fs::read_to_string(paths.descriptor_path())?;
    assert!(rendered.contains("lxc.utsname = myapp-1.2.3-prod-deadbeef-web-8000"));
    assert!(rendered.contains("lxc.network.type = none"));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_setup_then_teardown_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = RunnerRoot::new(dir.path());
    let descriptor = write_descriptor(dir.path())?;
    let spec = ProcessSpec::load(&descriptor)?;

    let dialect = Dialect::for_version(&EngineVersion::new(1, 0, 8));
    let provisioner = Provisioner::new(&spec, &root, dialect, Box::new(NoBaseImage));
    provisioner.setup().await?;
    assert!(provisioner.paths().proc_path.is_dir());

    lifecycle::teardown(&spec, &root)?;
    assert!(!provisioner.paths().proc_path.exists());

    // Tearing down a second time is fine.
    lifecycle::teardown(&spec, &root)?;

    Ok(())
}
