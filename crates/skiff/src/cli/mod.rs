//! CLI command definitions and handlers.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr, eyre};
use skiff_common::{ResourceConfig, SkiffPaths};
use skiff_network::Network;
use tabled::{Table, Tabled};

use crate::runtime::{ContainerInfo, RunOptions, RunOutcome, Runtime, image};

/// Skiff - Minimal Linux Container Runtime
#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for images and container layers
    #[arg(long, global = true, env = "SKIFF_ROOT", default_value = "/var/lib/skiff")]
    pub root: PathBuf,

    /// Directory for container records and network state
    #[arg(
        long,
        global = true,
        env = "SKIFF_RUNTIME_DIR",
        default_value = "/var/run/skiff"
    )]
    pub runtime_dir: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create and start a container
    Run {
        /// Attach the terminal and wait for the container to exit
        #[arg(long, conflicts_with = "detach")]
        ti: bool,

        /// Run in the background (the default)
        #[arg(short, long)]
        detach: bool,

        /// Bind mount a host directory (HOST:CONTAINER)
        #[arg(short, long)]
        volume: Option<String>,

        /// Container name (defaults to the generated id)
        #[arg(long)]
        name: Option<String>,

        /// Network to attach to
        #[arg(long)]
        net: Option<String>,

        /// Publish a port (HOST:CONTAINER)
        #[arg(short, long = "publish")]
        publish: Vec<String>,

        /// Memory limit, e.g. 100m
        #[arg(short, long)]
        memory: Option<String>,

        /// Relative CPU weight
        #[arg(long)]
        cpushare: Option<String>,

        /// CPUs the container may use, e.g. 0-1
        #[arg(long)]
        cpuset: Option<String>,

        /// Image to run
        image: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Container init process (internal)
    #[command(hide = true)]
    Init,

    /// List containers
    Ps,

    /// Print a container's output
    Logs {
        /// Keep printing new output
        #[arg(short, long)]
        follow: bool,

        /// Container name
        name: String,
    },

    /// Run a command in a running container
    Exec {
        /// Container name
        name: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Stop a running container
    Stop {
        /// Container name
        name: String,
    },

    /// Remove a stopped container
    Rm {
        /// Container name
        name: String,
    },

    /// Save a container's filesystem as a tar.gz archive
    Commit {
        /// Container name
        name: String,

        /// Archive to write
        output: PathBuf,
    },

    /// Import a tar or tar.gz archive as an image
    Load {
        /// Archive to read
        archive: PathBuf,

        /// Image name
        image: String,
    },

    /// Manage networks
    #[command(subcommand)]
    Network(NetworkCommands),
}

/// `skiff network` subcommands.
#[derive(Subcommand)]
pub enum NetworkCommands {
    /// Create a network
    Create {
        /// Network driver
        #[arg(long, default_value = "bridge")]
        driver: String,

        /// Subnet in CIDR notation, e.g. 172.18.0.0/24
        #[arg(long)]
        subnet: String,

        /// Network name, also the bridge device name
        name: String,
    },

    /// List networks
    #[command(alias = "ls")]
    List,

    /// Remove a network
    #[command(alias = "rm")]
    Remove {
        /// Network name
        name: String,
    },
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "COMMAND")]
    command: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

impl From<&ContainerInfo> for ContainerRow {
    fn from(info: &ContainerInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            pid: info.pid.map(|p| p.to_string()).unwrap_or_default(),
            status: info.status.to_string(),
            command: info.command.clone(),
            created: info.create_time.clone(),
        }
    }
}

#[derive(Tabled)]
struct NetworkRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "IP RANGE")]
    ip_range: String,
    #[tabled(rename = "DRIVER")]
    driver: String,
}

impl From<&Network> for NetworkRow {
    fn from(network: &Network) -> Self {
        Self {
            name: network.name.clone(),
            ip_range: network.ip_range.to_string(),
            driver: network.driver.clone(),
        }
    }
}

/// Render containers as the `ps` table.
#[must_use]
pub fn container_table(containers: &[ContainerInfo]) -> String {
    Table::new(containers.iter().map(ContainerRow::from)).to_string()
}

/// Render networks as the `network list` table.
#[must_use]
pub fn network_table(networks: &[Network]) -> String {
    Table::new(networks.iter().map(NetworkRow::from)).to_string()
}

/// Body of the hidden `init` command. Never returns on success.
///
/// Must run on the process's only thread, before any async runtime exists,
/// since the process becomes the container's pid 1.
pub fn run_init() -> Result<()> {
    if let Err(e) = crate::process::run_container_init() {
        tracing::error!(error = %e, "Container init failed");
        std::process::exit(1);
    }
    Ok(())
}

impl Cli {
    /// Paths selected by the global flags.
    #[must_use]
    pub fn paths(&self) -> SkiffPaths {
        SkiffPaths::with_root(self.root.clone()).with_runtime(self.runtime_dir.clone())
    }

    /// Whether this is the hidden `init` command.
    #[must_use]
    pub const fn is_init(&self) -> bool {
        matches!(self.command, Commands::Init)
    }

    /// Execute the CLI command.
    ///
    /// `init` is not handled here; see [`run_init`].
    pub async fn execute(self) -> Result<()> {
        let runtime = Runtime::new(self.paths());

        match self.command {
            Commands::Run {
                ti,
                detach: _,
                volume,
                name,
                net,
                publish,
                memory,
                cpushare,
                cpuset,
                image,
                command,
            } => {
                let options = RunOptions {
                    tty: ti,
                    name,
                    image,
                    command,
                    volume,
                    network: net,
                    ports: publish,
                    resources: ResourceConfig::from_flags(memory, cpushare, cpuset),
                };
                match runtime.run(options).await.map_err(|e| eyre!(e))? {
                    RunOutcome::Detached { name } => {
                        println!("{name}");
                        Ok(())
                    }
                    RunOutcome::Exited { code: 0, .. } => Ok(()),
                    RunOutcome::Exited { code, .. } => std::process::exit(code),
                }
            }

            Commands::Init => Err(eyre!(
                "init must be dispatched before the async runtime starts"
            )),

            Commands::Ps => {
                let containers = runtime.list().map_err(|e| eyre!(e))?;
                if containers.is_empty() {
                    println!("No containers");
                } else {
                    println!("{}", container_table(&containers));
                }
                Ok(())
            }

            Commands::Logs { follow, name } => {
                let mut stdout = std::io::stdout();
                runtime
                    .logs(&name, follow, &mut stdout)
                    .await
                    .map_err(|e| eyre!(e))
                    .wrap_err_with(|| format!("Failed to read logs of {name}"))?;
                stdout.flush()?;
                Ok(())
            }

            Commands::Exec { name, command } => {
                let code = runtime
                    .exec(&name, &command)
                    .await
                    .map_err(|e| eyre!(e))
                    .wrap_err_with(|| format!("Failed to exec in {name}"))?;
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            }

            Commands::Stop { name } => {
                runtime.stop(&name).await.map_err(|e| eyre!(e))?;
                println!("{name}");
                Ok(())
            }

            Commands::Rm { name } => {
                runtime.remove(&name).await.map_err(|e| eyre!(e))?;
                println!("{name}");
                Ok(())
            }

            Commands::Commit { name, output } => {
                image::commit(runtime.paths(), &name, &output).map_err(|e| eyre!(e))?;
                println!("{}", output.display());
                Ok(())
            }

            Commands::Load { archive, image: name } => {
                runtime.paths().create_dirs()?;
                image::load(runtime.paths(), &archive, &name).map_err(|e| eyre!(e))?;
                println!("{name}");
                Ok(())
            }

            Commands::Network(command) => execute_network(&runtime, command).await,
        }
    }
}

async fn execute_network(runtime: &Runtime, command: NetworkCommands) -> Result<()> {
    let manager = runtime.network();
    match command {
        NetworkCommands::Create {
            driver,
            subnet,
            name,
        } => {
            runtime.paths().create_dirs()?;
            let network = manager
                .create(&driver, &subnet, &name)
                .await
                .map_err(|e| eyre!(e))
                .wrap_err_with(|| format!("Failed to create network {name}"))?;
            println!("{} {}", network.name, network.ip_range);
            Ok(())
        }
        NetworkCommands::List => {
            let networks = manager.list().map_err(|e| eyre!(e))?;
            if networks.is_empty() {
                println!("No networks");
            } else {
                println!("{}", network_table(&networks));
            }
            Ok(())
        }
        NetworkCommands::Remove { name } => {
            manager.remove(&name).await.map_err(|e| eyre!(e))?;
            println!("{name}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerStatus;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags() {
        let cli = Cli::try_parse_from([
            "skiff", "run", "--ti", "-v", "/srv:/data", "--name", "web", "--net", "testnet",
            "-p", "8080:80", "-p", "8443:443", "-m", "100m", "busybox", "sh", "-c", "ls -l",
        ])
        .unwrap();
        let Commands::Run {
            ti,
            volume,
            publish,
            memory,
            image,
            command,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert!(ti);
        assert_eq!(volume.as_deref(), Some("/srv:/data"));
        assert_eq!(publish, ["8080:80", "8443:443"]);
        assert_eq!(memory.as_deref(), Some("100m"));
        assert_eq!(image, "busybox");
        assert_eq!(command, ["sh", "-c", "ls -l"]);
    }

    #[tokio::test]
    async fn init_is_dispatched_outside_the_runtime() {
        let cli = Cli::try_parse_from(["skiff", "init"]).unwrap();
        assert!(cli.is_init());
        assert!(cli.execute().await.is_err());

        let ps = Cli::try_parse_from(["skiff", "ps"]).unwrap();
        assert!(!ps.is_init());
    }

    #[test]
    fn ti_conflicts_with_detach() {
        assert!(Cli::try_parse_from(["skiff", "run", "--ti", "-d", "busybox", "top"]).is_err());
        assert!(Cli::try_parse_from(["skiff", "run", "busybox"]).is_err());
    }

    #[test]
    fn global_paths() {
        let cli = Cli::try_parse_from([
            "skiff", "--root", "/tmp/r", "--runtime-dir", "/tmp/run", "ps",
        ])
        .unwrap();
        let paths = cli.paths();
        assert_eq!(paths.root, PathBuf::from("/tmp/r"));
        assert_eq!(paths.runtime, PathBuf::from("/tmp/run"));
    }

    #[test]
    fn ps_table() {
        let mut info = ContainerInfo::new("a1b2c3d4e5", "web", 4242, &["top".to_string()]);
        info.create_time = "2024-01-02 03:04:05".to_string();
        let mut stopped = info.clone();
        stopped.name = "db".to_string();
        stopped.pid = None;
        stopped.status = ContainerStatus::Stopped;

        let table = container_table(&[info, stopped]);
        let lines: Vec<&str> = table.lines().filter(|l| l.starts_with('|')).collect();
        assert_eq!(lines.len(), 3);
        for header in ["ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"] {
            assert!(lines[0].contains(header), "{header} missing");
        }
        assert!(lines[1].contains("4242") && lines[1].contains("running"));
        assert!(lines[2].contains("db") && lines[2].contains("stopped"));
    }

    #[test]
    fn network_table_columns() {
        let network = Network::new("testnet", "bridge", "172.18.0.1/24".parse().unwrap());
        let table = network_table(&[network]);
        assert!(table.contains("IP RANGE"));
        assert!(table.contains("172.18.0.1/24"));
        assert!(table.contains("bridge"));
    }
}
