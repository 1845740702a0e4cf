//! Container lifecycle: run, stop, rm, logs and listing.

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use rustix::process::Signal;
use skiff_common::{
    ContainerId, ContainerName, ResourceConfig, SkiffError, SkiffPaths, SkiffResult,
};
use skiff_network::{ContainerLink, NetworkManager, PortMapping};

use super::info::{ContainerInfo, ContainerStatus, InfoStore};
use crate::cgroup::{CgroupManager, Hierarchy};
use crate::filesystem::{VolumeSpec, Workspace};
use crate::process::{self, ContainerProcess, ProcessConfig, Stdio};

/// Interval at which `logs --follow` polls for new output.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything `skiff run` was asked for, unvalidated.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attach to the terminal and wait.
    pub tty: bool,
    /// Container name; defaults to the generated id.
    pub name: Option<String>,
    /// Image directory name.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// `HOST:CONTAINER` volume.
    pub volume: Option<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// `HOST:CONTAINER` port forwards.
    pub ports: Vec<String>,
    /// Cgroup limits.
    pub resources: ResourceConfig,
}

/// How `run` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Left running in the background.
    Detached {
        /// Container name.
        name: String,
    },
    /// Ran in the foreground and exited.
    Exited {
        /// Container name.
        name: String,
        /// Exit code, `128 + signal` for a signal death.
        code: i32,
    },
}

/// Options after validation.
#[derive(Debug)]
struct RunPlan {
    id: ContainerId,
    name: ContainerName,
    volume: Option<VolumeSpec>,
    ports: Vec<PortMapping>,
}

/// Drives containers over the host's filesystem, cgroups and networks.
#[derive(Debug, Clone)]
pub struct Runtime {
    paths: SkiffPaths,
    info: InfoStore,
    network: NetworkManager,
    hierarchy: Hierarchy,
}

impl Runtime {
    /// Runtime over `paths` on the host's cgroup hierarchies.
    #[must_use]
    pub fn new(paths: SkiffPaths) -> Self {
        let network = NetworkManager::new(&paths);
        Self::with_parts(paths, network, Hierarchy::default())
    }

    /// Runtime with an explicit network manager and cgroup hierarchy.
    #[must_use]
    pub fn with_parts(paths: SkiffPaths, network: NetworkManager, hierarchy: Hierarchy) -> Self {
        Self {
            info: InfoStore::new(paths.clone()),
            paths,
            network,
            hierarchy,
        }
    }

    /// Filesystem locations.
    #[must_use]
    pub const fn paths(&self) -> &SkiffPaths {
        &self.paths
    }

    /// Container records.
    #[must_use]
    pub const fn info(&self) -> &InfoStore {
        &self.info
    }

    /// Network manager.
    #[must_use]
    pub const fn network(&self) -> &NetworkManager {
        &self.network
    }

    fn cgroup(&self, name: &str) -> CgroupManager {
        CgroupManager::with_hierarchy(name, self.hierarchy.clone())
    }

    fn validate(&self, options: &RunOptions) -> SkiffResult<RunPlan> {
        if options.command.is_empty() {
            return Err(SkiffError::Config {
                message: "no command given".to_string(),
            });
        }

        let id = ContainerId::generate();
        let name = match &options.name {
            Some(name) => ContainerName::new(name.as_str())?,
            None => ContainerName::from_id(&id),
        };
        if self.info.exists(name.as_str()) {
            return Err(SkiffError::ContainerExists {
                name: name.to_string(),
            });
        }

        options.resources.validate()?;
        let volume = VolumeSpec::parse_optional(options.volume.as_deref())?;
        let ports = PortMapping::parse_all(&options.ports)?;

        if let Some(network) = &options.network {
            if !self.network.store().exists(network) {
                return Err(SkiffError::NetworkNotFound {
                    name: network.clone(),
                });
            }
        } else if !ports.is_empty() {
            return Err(SkiffError::Config {
                message: "port mappings need a network (--net)".to_string(),
            });
        }

        Ok(RunPlan {
            id,
            name,
            volume,
            ports,
        })
    }

    /// Create and start a container.
    ///
    /// Every input is validated before anything is created. Once the child
    /// runs, a failure kills it and undoes whatever was set up.
    ///
    /// # Errors
    ///
    /// Returns the first validation, setup or launch error.
    pub async fn run(&self, options: RunOptions) -> SkiffResult<RunOutcome> {
        let plan = self.validate(&options)?;
        let name = plan.name.as_str();
        self.paths.create_dirs()?;

        let stdio = if options.tty {
            Stdio::Tty
        } else {
            Stdio::Log(self.info.log_file(name))
        };
        let config = ProcessConfig {
            name: name.to_string(),
            image: options.image.clone(),
            volume: plan.volume.clone(),
            stdio,
        };

        let (process, pipe) = match ContainerProcess::prepare(&self.paths, config) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.remove_record(name);
                return Err(e);
            }
        };
        let workspace = process.workspace().clone();

        let pid = match process.spawn() {
            Ok(pid) => pid,
            Err(e) => {
                if let Err(cleanup) = workspace.teardown() {
                    tracing::warn!(name, error = %cleanup, "Workspace cleanup failed");
                }
                self.remove_record(name);
                return Err(e);
            }
        };

        let mut info = ContainerInfo::new(plan.id.as_str(), name, pid, &options.command);
        info.volume = plan.volume.clone();
        info.port_map = plan.ports.clone();

        let started = match self.start(&options, &mut info, pid).await {
            Ok(()) => process::send_init_command(pipe, &options.command),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            tracing::error!(name, pid, error = %e, "Container setup failed, killing it");
            if let Err(kill) = process::signal(pid, Signal::KILL) {
                tracing::warn!(name, pid, error = %kill, "Failed to kill container");
            }
            if let Err(reap) = process::wait(pid).await {
                tracing::debug!(name, pid, error = %reap, "Failed to reap container");
            }
            self.teardown(&info, &workspace).await;
            return Err(e);
        }

        tracing::info!(name, pid, image = %options.image, "Container started");

        if !options.tty {
            return Ok(RunOutcome::Detached {
                name: name.to_string(),
            });
        }

        let code = process::wait(pid).await;
        tracing::info!(name, pid, ?code, "Container exited");
        self.teardown(&info, &workspace).await;
        Ok(RunOutcome::Exited {
            name: name.to_string(),
            code: code?,
        })
    }

    /// Limits, network and the record, in that order.
    async fn start(&self, options: &RunOptions, info: &mut ContainerInfo, pid: i32) -> SkiffResult<()> {
        let cgroup = self.cgroup(&info.name);
        cgroup.set(&options.resources)?;
        cgroup.apply(pid)?;

        if let Some(network) = &options.network {
            let link = ContainerLink {
                id: info.id.clone(),
                pid,
                port_map: info.port_map.clone(),
            };
            let address = self.network.connect(network, &link).await?;
            info.ip_addr = Some(address);
            info.network = Some(network.clone());
        }

        self.info.record(info)
    }

    /// Undo everything `run` set up. Failures are logged and skipped.
    async fn teardown(&self, info: &ContainerInfo, workspace: &Workspace) {
        self.disconnect(info).await;
        self.cgroup(&info.name).destroy();
        if let Err(e) = workspace.teardown() {
            tracing::warn!(name = %info.name, error = %e, "Workspace cleanup failed");
        }
        self.remove_record(&info.name);
    }

    async fn disconnect(&self, info: &ContainerInfo) {
        let (Some(network), Some(address)) = (&info.network, info.ip_addr) else {
            return;
        };
        if let Err(e) = self
            .network
            .disconnect(network, &info.id, address.addr(), &info.port_map)
            .await
        {
            tracing::warn!(name = %info.name, network, error = %e, "Network disconnect failed");
        }
    }

    fn remove_record(&self, name: &str) {
        if let Err(e) = self.info.remove(name) {
            tracing::warn!(name, error = %e, "Failed to remove container record");
        }
    }

    /// Send SIGTERM to a running container and mark it stopped.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerNotFound`] for an unknown container,
    /// [`SkiffError::Config`] if it is not running, or the signal error.
    pub async fn stop(&self, name: &str) -> SkiffResult<()> {
        let mut info = self.info.get_by_name(name)?;
        let pid = info.pid.ok_or_else(|| SkiffError::Config {
            message: format!("container {name} is not running"),
        })?;

        process::signal(pid, Signal::TERM)?;
        self.disconnect(&info).await;

        info.pid = None;
        info.ip_addr = None;
        info.status = ContainerStatus::Stopped;
        self.info.update(name, &info)?;

        tracing::info!(name, pid, "Container stopped");
        Ok(())
    }

    /// Delete a container that is not running.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerRunning`] for a running container, or
    /// the record or workspace removal error.
    pub async fn remove(&self, name: &str) -> SkiffResult<()> {
        let info = self.refresh(self.info.get_by_name(name)?);
        if info.status == ContainerStatus::Running {
            return Err(SkiffError::ContainerRunning {
                name: name.to_string(),
            });
        }

        self.info.remove(name)?;
        self.disconnect(&info).await;
        self.cgroup(name).destroy();
        Workspace::existing(&self.paths, name, info.volume.clone()).teardown()?;

        tracing::info!(name, "Container removed");
        Ok(())
    }

    /// All containers, with dead `running` ones marked exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be read.
    pub fn list(&self) -> SkiffResult<Vec<ContainerInfo>> {
        Ok(self
            .info
            .list_all()?
            .into_iter()
            .map(|info| self.refresh(info))
            .collect())
    }

    /// Mark a `running` record whose process is gone as exited.
    fn refresh(&self, mut info: ContainerInfo) -> ContainerInfo {
        if info.status != ContainerStatus::Running {
            return info;
        }
        let alive = info
            .pid
            .is_some_and(|pid| std::path::Path::new(&format!("/proc/{pid}")).exists());
        if !alive {
            info.status = ContainerStatus::Exited;
            if let Err(e) = self.info.update(&info.name, &info) {
                tracing::debug!(name = %info.name, error = %e, "Failed to persist exited status");
            }
        }
        info
    }

    /// Copy the container's log to `out`. With `follow`, keep polling for
    /// new output until the task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerNotFound`] for an unknown container,
    /// [`SkiffError::Config`] if it has no log file, or a read/write error.
    pub async fn logs<W: Write + Send>(&self, name: &str, follow: bool, out: &mut W) -> SkiffResult<()> {
        if !self.info.exists(name) {
            return Err(SkiffError::ContainerNotFound {
                name: name.to_string(),
            });
        }
        let path = self.info.log_file(name);
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::Config {
                    message: format!("container {name} has no log file (started with --ti?)"),
                }
            } else {
                SkiffError::os("open", &path, e)
            }
        })?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    if !follow {
                        break;
                    }
                    out.flush()?;
                    tokio::time::sleep(LOG_POLL_INTERVAL).await;
                }
                Ok(_) => out.write_all(&line)?,
                Err(e) => return Err(SkiffError::os("read", &path, e)),
            }
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn runtime(temp: &TempDir) -> Runtime {
        let paths = SkiffPaths::with_root(temp.path());
        let network = NetworkManager::new(&paths);
        Runtime::with_parts(paths, network, Hierarchy::Fixed(temp.path().join("cgroup")))
    }

    fn options(command: &[&str]) -> RunOptions {
        RunOptions {
            image: "busybox".to_string(),
            command: command.iter().map(ToString::to_string).collect(),
            ..RunOptions::default()
        }
    }

    fn recorded(runtime: &Runtime, name: &str, pid: Option<i32>, status: ContainerStatus) -> ContainerInfo {
        let mut info = ContainerInfo::new("0123456789", name, 1, &["top".to_string()]);
        runtime.info().record(&mut info).unwrap();
        info.pid = pid;
        info.status = status;
        runtime.info().update(name, &info).unwrap();
        info
    }

    #[tokio::test]
    async fn run_validates_before_creating_anything() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);

        let err = runtime.run(options(&[])).await.unwrap_err();
        assert!(matches!(err, SkiffError::Config { .. }));

        let mut bad_volume = options(&["sh"]);
        bad_volume.volume = Some("/only-one-part".to_string());
        let err = runtime.run(bad_volume).await.unwrap_err();
        assert!(matches!(err, SkiffError::InvalidVolume { .. }));

        let mut bad_port = options(&["sh"]);
        bad_port.network = Some("testnet".to_string());
        bad_port.ports = vec!["80".to_string()];
        let err = runtime.run(bad_port).await.unwrap_err();
        assert!(matches!(err, SkiffError::InvalidPortMapping { .. }));

        let mut bad_memory = options(&["sh"]);
        bad_memory.resources.memory_limit = Some("lots".to_string());
        let err = runtime.run(bad_memory).await.unwrap_err();
        assert!(matches!(err, SkiffError::InvalidResource { .. }));

        let mut unknown_net = options(&["sh"]);
        unknown_net.network = Some("nowhere".to_string());
        let err = runtime.run(unknown_net).await.unwrap_err();
        assert!(matches!(err, SkiffError::NetworkNotFound { .. }));

        assert!(!temp.path().join("overlay2").exists());
    }

    #[tokio::test]
    async fn run_rejects_taken_names() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);
        recorded(&runtime, "web", Some(1), ContainerStatus::Running);

        let mut opts = options(&["sh"]);
        opts.name = Some("web".to_string());
        assert!(matches!(
            runtime.run(opts).await,
            Err(SkiffError::ContainerExists { .. })
        ));

        let mut opts = options(&["sh"]);
        opts.name = Some("../escape".to_string());
        assert!(matches!(
            runtime.run(opts).await,
            Err(SkiffError::InvalidContainerName { .. })
        ));
    }

    #[tokio::test]
    async fn missing_image_leaves_no_record() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);

        let mut opts = options(&["sh"]);
        opts.name = Some("web".to_string());
        assert!(matches!(
            runtime.run(opts).await,
            Err(SkiffError::ImageNotFound { .. })
        ));
        assert!(!runtime.info().info_dir("web").exists());
    }

    #[tokio::test]
    async fn stop_marks_stopped() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        recorded(&runtime, "web", Some(pid), ContainerStatus::Running);

        runtime.stop("web").await.unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());

        let info = runtime.info().get_by_name("web").unwrap();
        assert_eq!(info.pid, None);
        assert_eq!(info.status, ContainerStatus::Stopped);

        assert!(matches!(runtime.stop("web").await, Err(SkiffError::Config { .. })));
        assert!(matches!(
            runtime.stop("ghost").await,
            Err(SkiffError::ContainerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn remove_refuses_running() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);
        let own_pid = i32::try_from(std::process::id()).unwrap();
        recorded(&runtime, "web", Some(own_pid), ContainerStatus::Running);

        assert!(matches!(
            runtime.remove("web").await,
            Err(SkiffError::ContainerRunning { .. })
        ));
        assert!(runtime.info().exists("web"));
    }

    #[tokio::test]
    async fn remove_stopped_container() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);
        recorded(&runtime, "web", None, ContainerStatus::Stopped);

        let cgroup_node = temp.path().join("cgroup/memory/skiff/web");
        std::fs::create_dir_all(&cgroup_node).unwrap();

        match runtime.remove("web").await {
            Ok(()) => {}
            // Unprivileged unmount of the empty mount point is refused.
            Err(e) => assert!(e.to_string().starts_with("umount "), "{e}"),
        }
        assert!(!runtime.info().exists("web"));
        assert!(!cgroup_node.exists());
    }

    #[test]
    fn dead_containers_show_as_exited() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead = i32::try_from(child.id()).unwrap();
        child.wait().unwrap();
        let alive = i32::try_from(std::process::id()).unwrap();

        recorded(&runtime, "gone", Some(dead), ContainerStatus::Running);
        recorded(&runtime, "here", Some(alive), ContainerStatus::Running);

        let list = runtime.list().unwrap();
        let status = |name: &str| list.iter().find(|i| i.name == name).unwrap().status;
        assert_eq!(status("gone"), ContainerStatus::Exited);
        assert_eq!(status("here"), ContainerStatus::Running);
        assert_eq!(
            runtime.info().get_by_name("gone").unwrap().status,
            ContainerStatus::Exited
        );
    }

    #[tokio::test]
    async fn logs_copy_the_file() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);
        recorded(&runtime, "web", Some(1), ContainerStatus::Running);
        std::fs::write(runtime.info().log_file("web"), "one\ntwo\n").unwrap();

        let mut out = Vec::new();
        runtime.logs("web", false, &mut out).await.unwrap();
        assert_eq!(out, b"one\ntwo\n");

        let mut out = Vec::new();
        assert!(matches!(
            runtime.logs("ghost", false, &mut out).await,
            Err(SkiffError::ContainerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn logs_pass_raw_bytes_through() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);
        recorded(&runtime, "web", Some(1), ContainerStatus::Running);
        let raw = b"ok\n\xff\xfe bin\nno newline";
        std::fs::write(runtime.info().log_file("web"), raw).unwrap();

        let mut out = Vec::new();
        runtime.logs("web", false, &mut out).await.unwrap();
        assert_eq!(out, raw);
    }

    #[tokio::test]
    async fn logs_follow_picks_up_appends() {
        let temp = tempdir().unwrap();
        let runtime = runtime(&temp);
        recorded(&runtime, "web", Some(1), ContainerStatus::Running);
        let log = runtime.info().log_file("web");
        std::fs::write(&log, "first\n").unwrap();

        let writer = tokio::spawn({
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                let mut file = std::fs::OpenOptions::new().append(true).open(log).unwrap();
                file.write_all(b"second\n").unwrap();
            }
        });

        let mut out = Vec::new();
        let _ = tokio::time::timeout(
            Duration::from_millis(600),
            runtime.logs("web", true, &mut out),
        )
        .await;
        writer.await.unwrap();
        assert_eq!(out, b"first\nsecond\n");
    }
}
