//! Container provisioning.
//!
//! Builds the full on-disk container skeleton and its boot-time artifacts
//! from a process descriptor: directory layout, build acquisition, the
//! rendered container descriptor, and the entrypoint/environment scripts.
//!
//! Failures abort setup immediately. Partially created directories are not
//! rolled back; teardown is the explicit remedy. No artifact beyond the
//! failing step is written.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::config::ProcessSpec;
use crate::engine::{Dialect, NETWORK_ISOLATION_STANZA};
use crate::utils::env::resolve_env_value;
use crate::utils::file::make_executable;
use crate::utils::path::{
    container_name, ContainerPaths, RunnerRoot, ENV_SCRIPT_FILENAME, PROCFILE_FILENAME,
    PROC_SCRIPT_FILENAME, SETTINGS_FILENAME,
};
use crate::{ProcboxError, ProcboxResult};

use super::image::BaseImage;
use super::{archive, fetch};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provisions one container directory tree from a process descriptor.
///
/// The provisioner is parameterized by a [`BaseImage`] strategy; the same
/// setup sequence serves plain containers and image-overlay containers.
pub struct Provisioner<'s> {
    spec: &'s ProcessSpec,
    paths: ContainerPaths,
    dialect: Dialect,
    base: Box<dyn BaseImage>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'s> Provisioner<'s> {
    /// Creates a provisioner for a descriptor under an explicit root.
    pub fn new(
        spec: &'s ProcessSpec,
        root: &RunnerRoot,
        dialect: Dialect,
        base: Box<dyn BaseImage>,
    ) -> Self {
        Self {
            paths: ContainerPaths::derive(spec, root),
            spec,
            dialect,
            base,
        }
    }

    /// The primary container name for this process instance.
    pub fn container_name(&self) -> String {
        container_name(self.spec)
    }

    /// The derived on-disk layout.
    pub fn paths(&self) -> &ContainerPaths {
        &self.paths
    }

    /// Runs the full setup sequence.
    ///
    /// Order matters: the base image is ensured first (it lives outside the
    /// proc tree), then directories, the build, device nodes when an overlay
    /// is in play, and finally the rendered artifacts.
    pub async fn setup(&self) -> ProcboxResult<()> {
        tracing::info!("setting up {}", self.container_name());

        let lower = self.base.ensure_base(self.spec, &self.paths).await?;
        self.make_proc_dirs()?;
        self.ensure_build().await?;
        if lower.is_some() {
            super::image::ensure_char_devices(&self.paths.container_path)?;
        }
        self.write_descriptor(lower.as_deref())?;
        self.write_settings()?;
        self.write_proc_script()?;
        self.write_env_script()?;
        Ok(())
    }

    /// Resolves the command the container will exec.
    ///
    /// `cmd` from the descriptor wins; otherwise the `Procfile` inside the
    /// extracted build is parsed as a YAML map and the `proc_name` entry is
    /// taken.
    pub fn resolve_cmd(&self) -> ProcboxResult<String> {
        if let Some(cmd) = &self.spec.cmd {
            return Ok(cmd.clone());
        }

        let procfile = self.paths.app_path.join(PROCFILE_FILENAME);
        let text = fs::read_to_string(&procfile)?;
        let procs: BTreeMap<String, String> = serde_yaml::from_str(&text)?;
        procs.get(&self.spec.proc_name).cloned().ok_or_else(|| {
            ProcboxError::Config(format!(
                "no Procfile entry for {} in {}",
                self.spec.proc_name,
                procfile.display()
            ))
        })
    }

    /// Creates the proc tree, the rootfs, the work layer, and a mount point
    /// for every declared volume.
    fn make_proc_dirs(&self) -> ProcboxResult<()> {
        tracing::info!("making directories under {}", self.paths.proc_path.display());

        fs::create_dir_all(&self.paths.proc_path)?;
        fs::create_dir_all(&self.paths.container_path)?;
        fs::create_dir_all(&self.paths.work_path)?;

        for (_, inside) in &self.spec.volumes {
            let mount_point = self
                .paths
                .container_path
                .join(inside.trim_start_matches('/'));
            fs::create_dir_all(mount_point)?;
        }
        Ok(())
    }

    /// Fetches the build artifact into the shared builds cache and unpacks
    /// it into the app directory, owned by the descriptor's user and group.
    async fn ensure_build(&self) -> ProcboxResult<()> {
        let Some(build_url) = &self.spec.build_url else {
            return Ok(());
        };

        fs::create_dir_all(&self.paths.builds_root)?;
        let buildfile = self.paths.buildfile_path(build_url)?;
        fetch::ensure_file(build_url, &buildfile, self.spec.build_md5.as_deref()).await?;

        tracing::info!("untarring {}", buildfile.display());
        let app_path = self.paths.app_path.clone();
        let user = self.spec.user.clone();
        let group = self.spec.group.clone();
        tokio::task::spawn_blocking(move || {
            archive::extract(&buildfile, &app_path, Some((user.as_str(), group.as_str())), true)
        })
        .await
        .map_err(|e| ProcboxError::Extraction(format!("{:?}", e)))??;

        Ok(())
    }

    /// Renders the container descriptor next to the rootfs.
    fn write_descriptor(&self, lower: Option<&Path>) -> ProcboxResult<()> {
        tracing::info!("writing {}", self.paths.descriptor_path().display());
        let content = self.render_descriptor(lower);
        fs::write(self.paths.descriptor_path(), content)?;
        Ok(())
    }

    /// Builds the descriptor text for this instance's dialect.
    pub fn render_descriptor(&self, lower: Option<&Path>) -> String {
        let container = self.paths.container_path.display();
        let mut content = String::new();

        let _ = writeln!(content, "lxc.utsname = {}", self.container_name());
        let _ = writeln!(content, "lxc.rootfs = {}", container);

        if let Some(image) = lower {
            let kw = self.dialect.overlay_keyword;
            if self.dialect.emits_workdir_clause {
                let _ = writeln!(
                    content,
                    "lxc.mount.entry = {} {} {} lowerdir={},upperdir={},workdir={} 0 0",
                    kw,
                    container,
                    kw,
                    image.display(),
                    container,
                    self.paths.work_path.display()
                );
            } else {
                let _ = writeln!(
                    content,
                    "lxc.mount.entry = {} {} {} lowerdir={},upperdir={} 0 0",
                    kw,
                    container,
                    kw,
                    image.display(),
                    container
                );
            }
        }

        if self.dialect.emits_network_isolation {
            let _ = writeln!(content, "{}", NETWORK_ISOLATION_STANZA);
        }

        if let Some(limit) = &self.spec.mem_limit {
            let _ = writeln!(content, "lxc.cgroup.memory.limit_in_bytes = {}", limit);
        }
        if let Some(limit) = &self.spec.memsw_limit {
            let _ = writeln!(content, "lxc.cgroup.memory.memsw.limit_in_bytes = {}", limit);
        }

        for (outside, inside) in &self.spec.volumes {
            let _ = writeln!(
                content,
                "lxc.mount.entry = {} {}{} none bind 0 0",
                outside, container, inside
            );
        }

        content
    }

    /// Serializes the descriptor's settings object verbatim.
    fn write_settings(&self) -> ProcboxResult<()> {
        tracing::info!("writing {}", SETTINGS_FILENAME);
        let path = self.paths.container_path.join(SETTINGS_FILENAME);
        fs::write(path, serde_yaml::to_string(&self.spec.settings)?)?;
        Ok(())
    }

    /// Writes the executable entrypoint script.
    ///
    /// The script is the first thing called inside the container. Invoked
    /// with the literal argument `run` it execs the resolved command;
    /// invoked with anything else it execs that argument instead, which is
    /// how shell and uptest reuse the same entrypoint.
    fn write_proc_script(&self) -> ProcboxResult<()> {
        tracing::info!("writing {}", PROC_SCRIPT_FILENAME);
        let cmd = self.resolve_cmd()?;
        let content = format!(
            r#"#!/bin/bash
export TMPDIR={tmp}
export HOME={home}
export SETTINGS_YAML={settings}
export PORT={port}
cd {home}
source {envsh}
if [ "$1" = "run" ]; then
    exec {cmd}
else
    exec $1
fi
"#,
            tmp = "/tmp",
            home = "/app",
            settings = "/settings.yaml",
            envsh = "/env.sh",
            port = self.spec.port,
            cmd = cmd,
        );

        let path = self.paths.container_path.join(PROC_SCRIPT_FILENAME);
        fs::write(&path, content)?;
        make_executable(&path)?;
        Ok(())
    }

    /// Writes the executable environment script: one export line per entry,
    /// in the descriptor's declared order, `$`-values resolved against the
    /// provisioning host's environment at render time.
    fn write_env_script(&self) -> ProcboxResult<()> {
        tracing::info!("writing {}", ENV_SCRIPT_FILENAME);
        let mut content = String::new();
        for (key, value) in &self.spec.env {
            let _ = writeln!(content, "export {}=\"{}\"", key, resolve_env_value(value));
        }

        let path = self.paths.container_path.join(ENV_SCRIPT_FILENAME);
        fs::write(&path, content)?;
        make_executable(&path)?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineVersion;
    use crate::management::image::{NoBaseImage, PreparedImage};
    use crate::utils::file::is_executable;

    fn minimal_spec() -> ProcessSpec {
        serde_yaml::from_str(
            r#"
app_name: myApp
proc_name: proc.exe
port: 1234
release_hash: deadbeef
version: "1.0"
config_name: config-name
cmd: command
user: nobody
group: nogroup
host: localhost
"#,
        )
        .unwrap()
    }

    fn dialect(version: &str) -> Dialect {
        Dialect::for_version(&version.parse::<EngineVersion>().unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn test_setup_produces_all_artifacts() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let spec = minimal_spec();
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        p.setup().await.unwrap();

        let container = &p.paths().container_path;
        assert!(container.join("env.sh").exists(), "env.sh missing");
        assert!(container.join("proc.sh").exists(), "proc.sh missing");
        assert!(container.join("settings.yaml").exists(), "settings.yaml missing");
        assert!(p.paths().descriptor_path().exists(), "proc.lxc missing");
        assert!(p.paths().work_path.is_dir(), "work dir missing");

        assert!(is_executable(container.join("proc.sh")).unwrap());
        assert!(is_executable(container.join("env.sh")).unwrap());
    }

    #[test_log::test(tokio::test)]
    async fn test_proc_script_contents() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let spec = minimal_spec();
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));
        p.setup().await.unwrap();

        let script =
            fs::read_to_string(p.paths().container_path.join("proc.sh")).unwrap();
        assert!(script.contains("export PORT=1234"));
        assert!(script.contains("cd /app"));
        assert!(script.contains("source /env.sh"));
        assert!(script.contains("exec command"));
        assert!(script.contains("export SETTINGS_YAML=/settings.yaml"));
    }

    #[test]
    fn test_descriptor_dialect_pre_1_0() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let spec = minimal_spec();
        let image = root_dir.path().join("image");
        let p = Provisioner::new(&spec, &root, dialect("0.9.9"), Box::new(NoBaseImage));

        let content = p.render_descriptor(Some(&image));
        assert!(!content.contains("lxc.network.type = none"));
        assert!(content.contains("lxc.mount.entry = overlayfs "));
        assert!(!content.contains("workdir"));
    }

    #[test]
    fn test_descriptor_dialect_1_x() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let spec = minimal_spec();
        let image = root_dir.path().join("image");
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        let content = p.render_descriptor(Some(&image));
        assert!(content.contains("lxc.network.type = none"));
        assert!(content.contains("lxc.mount.entry = overlayfs "));
        assert!(!content.contains("workdir"));
    }

    #[test]
    fn test_descriptor_dialect_2_x() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let spec = minimal_spec();
        let image = root_dir.path().join("image");
        let p = Provisioner::new(&spec, &root, dialect("2.0.1"), Box::new(NoBaseImage));

        let content = p.render_descriptor(Some(&image));
        assert!(content.contains("lxc.network.type = none"));
        assert!(content.contains("lxc.mount.entry = overlay "));
        assert!(!content.contains("overlayfs"));
        assert!(content.contains("workdir"));
    }

    #[test]
    fn test_descriptor_memory_limits() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let mut spec = minimal_spec();
        spec.mem_limit = Some("536870912".to_string());
        spec.memsw_limit = Some("671088640".to_string());
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        let content = p.render_descriptor(None);
        assert!(content.contains("lxc.cgroup.memory.limit_in_bytes = 536870912"));
        assert!(content.contains("lxc.cgroup.memory.memsw.limit_in_bytes = 671088640"));

        let plain = Provisioner::new(
            &{
                let mut s = minimal_spec();
                s.mem_limit = None;
                s
            },
            &root,
            dialect("1.0.8"),
            Box::new(NoBaseImage),
        )
        .render_descriptor(None);
        assert!(!plain.contains("limit_in_bytes"));
    }

    #[test]
    fn test_descriptor_volume_lines_in_declared_order() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let mut spec = minimal_spec();
        spec.volumes = vec![
            ("/var/data".to_string(), "/data".to_string()),
            ("/var/log/app".to_string(), "/logs".to_string()),
        ];
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        let content = p.render_descriptor(None);
        let container = p.paths().container_path.display().to_string();
        let first = format!(
            "lxc.mount.entry = /var/data {}/data none bind 0 0",
            container
        );
        let second = format!(
            "lxc.mount.entry = /var/log/app {}/logs none bind 0 0",
            container
        );
        let first_at = content.find(&first).expect("first bind line missing");
        let second_at = content.find(&second).expect("second bind line missing");
        assert!(first_at < second_at, "bind lines out of declared order");
        assert_eq!(content.matches("none bind 0 0").count(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_setup_creates_volume_mount_points() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let mut spec = minimal_spec();
        spec.volumes = vec![("/var/data".to_string(), "/data/files".to_string())];
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        p.setup().await.unwrap();
        assert!(p.paths().container_path.join("data/files").is_dir());
    }

    #[test_log::test(tokio::test)]
    async fn test_env_script_order_and_interpolation() {
        std::env::set_var("PROCBOX_TEST_TOKEN", "sekrit");
        std::env::remove_var("PROCBOX_TEST_ABSENT");

        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let yaml = r#"
app_name: myApp
proc_name: proc.exe
port: 1234
release_hash: deadbeef
version: "1.0"
config_name: config-name
cmd: command
user: nobody
group: nogroup
host: localhost
env:
  ZED: plain-value
  TOKEN: $PROCBOX_TEST_TOKEN
  MISSING: $PROCBOX_TEST_ABSENT
"#;
        let spec: ProcessSpec = serde_yaml::from_str(yaml).unwrap();
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));
        p.setup().await.unwrap();

        let env_sh =
            fs::read_to_string(p.paths().container_path.join("env.sh")).unwrap();
        assert_eq!(
            env_sh,
            "export ZED=\"plain-value\"\nexport TOKEN=\"sekrit\"\nexport MISSING=\"\"\n"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_settings_serialized_verbatim() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let yaml = r#"
app_name: myApp
proc_name: proc.exe
port: 1234
release_hash: deadbeef
version: "1.0"
config_name: config-name
cmd: command
user: nobody
group: nogroup
host: localhost
settings:
  DEBUG: false
  DATABASE_URL: postgres://db/app
"#;
        let spec: ProcessSpec = serde_yaml::from_str(yaml).unwrap();
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));
        p.setup().await.unwrap();

        let written =
            fs::read_to_string(p.paths().container_path.join("settings.yaml")).unwrap();
        let round_tripped: serde_yaml::Value = serde_yaml::from_str(&written).unwrap();
        assert_eq!(round_tripped, spec.settings);
    }

    #[test_log::test(tokio::test)]
    async fn test_cmd_resolution_from_procfile() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let mut spec = minimal_spec();
        spec.cmd = None;
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        fs::create_dir_all(&p.paths().app_path).unwrap();
        fs::write(
            p.paths().app_path.join("Procfile"),
            "proc.exe: python run.py\nworker: python work.py\n",
        )
        .unwrap();

        assert_eq!(p.resolve_cmd().unwrap(), "python run.py");
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_procfile_entry_is_config_error() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let mut spec = minimal_spec();
        spec.cmd = None;
        spec.proc_name = "absent".to_string();
        let p = Provisioner::new(&spec, &root, dialect("1.0.8"), Box::new(NoBaseImage));

        fs::create_dir_all(&p.paths().app_path).unwrap();
        fs::write(p.paths().app_path.join("Procfile"), "web: run\n").unwrap();

        assert!(matches!(
            p.resolve_cmd().unwrap_err(),
            ProcboxError::Config(_)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_image_setup_skips_existing_device_files() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = RunnerRoot::new(root_dir.path());
        let spec = minimal_spec();

        let image_contents = root_dir.path().join("image-contents");
        fs::create_dir_all(&image_contents).unwrap();

        let p = Provisioner::new(
            &spec,
            &root,
            dialect("2.0.1"),
            Box::new(PreparedImage {
                contents: image_contents.clone(),
            }),
        );

        // Pre-create the device paths; setup must take the skip branch
        // rather than calling mknod (which needs privileges).
        let dev = p.paths().container_path.join("dev");
        fs::create_dir_all(&dev).unwrap();
        for node in ["null", "zero", "random", "urandom"] {
            fs::write(dev.join(node), "").unwrap();
        }

        p.setup().await.unwrap();

        let descriptor = fs::read_to_string(p.paths().descriptor_path()).unwrap();
        assert!(descriptor.contains("lxc.mount.entry = overlay "));
        assert!(descriptor.contains(&format!("lowerdir={}", image_contents.display())));
        assert!(descriptor.contains(&format!(
            "workdir={}",
            p.paths().work_path.display()
        )));
    }
}
