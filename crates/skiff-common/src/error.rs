//! Common error types for the Skiff runtime.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`SkiffError`].
pub type SkiffResult<T> = Result<T, SkiffError>;

/// Common errors across the Skiff crates.
#[derive(Error, Diagnostic, Debug)]
pub enum SkiffError {
    /// Container not found.
    #[error("Container not found: {name}")]
    #[diagnostic(code(skiff::container::not_found), help("List containers with `skiff ps`"))]
    ContainerNotFound {
        /// The container name that was not found.
        name: String,
    },

    /// A container with this name already exists.
    #[error("Container already exists: {name}")]
    #[diagnostic(
        code(skiff::container::exists),
        help("Pick another --name or remove the old container with `skiff rm`")
    )]
    ContainerExists {
        /// The conflicting name.
        name: String,
    },

    /// Operation refused because the container is still running.
    #[error("Container is running: {name}")]
    #[diagnostic(
        code(skiff::container::running),
        help("Stop it first with `skiff stop`")
    )]
    ContainerRunning {
        /// The running container.
        name: String,
    },

    /// Invalid container name format.
    #[error("Invalid container name: {name}")]
    #[diagnostic(
        code(skiff::container::invalid_name),
        help("Names must be alphanumeric with '-', '_' or '.', 1-64 characters")
    )]
    InvalidContainerName {
        /// The invalid name.
        name: String,
    },

    /// Image not found.
    #[error("Image not found: {image}")]
    #[diagnostic(code(skiff::image::not_found), help("Import one with `skiff load`"))]
    ImageNotFound {
        /// The image name that was not found.
        image: String,
    },

    /// Image already exists.
    #[error("Image already exists: {image}")]
    #[diagnostic(code(skiff::image::exists))]
    ImageExists {
        /// The existing image name.
        image: String,
    },

    /// Malformed volume specification.
    #[error("Invalid volume spec: {spec}")]
    #[diagnostic(
        code(skiff::volume::invalid),
        help("Use the form HOST_PATH:CONTAINER_PATH, both parts non-empty")
    )]
    InvalidVolume {
        /// The rejected spec.
        spec: String,
    },

    /// Malformed port mapping.
    #[error("Invalid port mapping: {spec}")]
    #[diagnostic(
        code(skiff::network::invalid_port_mapping),
        help("Use the form HOST_PORT:CONTAINER_PORT, e.g. 8080:80")
    )]
    InvalidPortMapping {
        /// The rejected mapping.
        spec: String,
    },

    /// Malformed or unsupported subnet.
    #[error("Invalid subnet '{subnet}': {reason}")]
    #[diagnostic(
        code(skiff::network::invalid_subnet),
        help("Use IPv4 CIDR notation with a prefix of /30 or shorter, e.g. 172.18.0.0/24")
    )]
    InvalidSubnet {
        /// The rejected subnet.
        subnet: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid cgroup resource value.
    #[error("Invalid {resource} value: {value}")]
    #[diagnostic(
        code(skiff::resource::invalid),
        help("Memory: 512m, 1g, 1048576. CPU share: positive integer. Cpuset: 0-2,4")
    )]
    InvalidResource {
        /// Which resource.
        resource: String,
        /// The rejected value.
        value: String,
    },

    /// Network not found.
    #[error("No such network: {name}")]
    #[diagnostic(code(skiff::network::not_found), help("List networks with `skiff network list`"))]
    NetworkNotFound {
        /// The network name.
        name: String,
    },

    /// Network already exists.
    #[error("Network already exists: {name}")]
    #[diagnostic(code(skiff::network::exists))]
    NetworkExists {
        /// The network name.
        name: String,
    },

    /// No driver registered under this name.
    #[error("No such network driver: {driver}")]
    #[diagnostic(code(skiff::network::driver_not_found), help("Available drivers: bridge"))]
    DriverNotFound {
        /// The driver name.
        driver: String,
    },

    /// Every address in the subnet is in use.
    #[error("No free address left in subnet {subnet}")]
    #[diagnostic(code(skiff::ipam::exhausted))]
    SubnetExhausted {
        /// The exhausted subnet.
        subnet: String,
    },

    /// Release of an address the allocator does not hold.
    #[error("Address {ip} is not allocated in subnet {subnet}")]
    #[diagnostic(code(skiff::ipam::not_allocated))]
    AddressNotAllocated {
        /// The subnet.
        subnet: String,
        /// The address.
        ip: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(skiff::io))]
    Io(#[from] std::io::Error),

    /// A system call on a specific path failed.
    #[error("{operation} {} failed: {source}", path.display())]
    #[diagnostic(code(skiff::os))]
    Os {
        /// What was attempted (mount, pivot_root, write, ...).
        operation: String,
        /// The path involved.
        path: std::path::PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(skiff::serialization))]
    Serialization(String),

    /// Permission denied.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(skiff::permission_denied),
        help("Try running with elevated privileges (sudo)")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(code(skiff::unsupported), help("Skiff only runs on Linux"))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(skiff::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// An external tool (`ip`, `iptables`) exited unsuccessfully.
    #[error("`{program} {args}` failed: {stderr}")]
    #[diagnostic(code(skiff::command))]
    Command {
        /// Program name.
        program: String,
        /// Space-joined arguments.
        args: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(skiff::internal),
        help("This is a bug, please report it at https://github.com/fishmindlabs360/skiff/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl SkiffError {
    /// Wrap an OS error with the operation and path it happened on.
    #[must_use]
    pub fn os(operation: &str, path: &std::path::Path, source: impl Into<std::io::Error>) -> Self {
        Self::Os {
            operation: operation.to_string(),
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    /// Whether this error wraps an OS "not found" condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(e) | Self::Os { source: e, .. } => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SkiffError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
