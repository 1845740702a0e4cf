//! End-to-end container runs. These need root, cgroup v1 controllers and a
//! busybox root filesystem tarball named by `SKIFF_TEST_ROOTFS`.

use std::path::PathBuf;
use std::time::Duration;

use skiff::runtime::{ContainerStatus, RunOptions, RunOutcome, Runtime, image};
use skiff_common::{ResourceConfig, SkiffPaths};
use tempfile::TempDir;

fn runtime_with_busybox(temp: &TempDir) -> Runtime {
    let rootfs = PathBuf::from(
        std::env::var_os("SKIFF_TEST_ROOTFS").expect("SKIFF_TEST_ROOTFS must name a rootfs tarball"),
    );
    let paths = SkiffPaths::with_root(temp.path());
    paths.create_dirs().unwrap();
    image::load(&paths, &rootfs, "busybox").unwrap();
    Runtime::new(paths)
}

fn busybox(command: &[&str]) -> RunOptions {
    RunOptions {
        image: "busybox".to_string(),
        command: command.iter().map(ToString::to_string).collect(),
        ..RunOptions::default()
    }
}

#[test_log::test(tokio::test)]
#[ignore = "requires root, cgroup v1 and SKIFF_TEST_ROOTFS"]
async fn foreground_run_reports_exit_code_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    let runtime = runtime_with_busybox(&temp);

    let mut options = busybox(&["sh", "-c", "exit 7"]);
    options.tty = true;
    options.name = Some("fg".to_string());
    options.resources = ResourceConfig::from_flags(Some("64m".into()), Some("512".into()), None);

    let outcome = runtime.run(options).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Exited {
            name: "fg".to_string(),
            code: 7
        }
    );
    assert!(!runtime.info().exists("fg"));
    assert!(!runtime.paths().container_mnt("fg").exists());
}

#[test_log::test(tokio::test)]
#[ignore = "requires root, cgroup v1 and SKIFF_TEST_ROOTFS"]
async fn detached_run_logs_and_stops() {
    let temp = TempDir::new().unwrap();
    let runtime = runtime_with_busybox(&temp);

    let mut options = busybox(&["sh", "-c", "echo hello; sleep 60"]);
    options.name = Some("bg".to_string());
    let host_dir = temp.path().join("shared");
    options.volume = Some(format!("{}:/shared", host_dir.display()));

    let outcome = runtime.run(options).await.unwrap();
    assert_eq!(outcome, RunOutcome::Detached { name: "bg".to_string() });

    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut out = Vec::new();
    runtime.logs("bg", false, &mut out).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "hello\n");

    let code = runtime
        .exec("bg", &["touch".to_string(), "/shared/from-exec".to_string()])
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert!(host_dir.join("from-exec").is_file());

    runtime.stop("bg").await.unwrap();
    let info = runtime.info().get_by_name("bg").unwrap();
    assert_eq!(info.status, ContainerStatus::Stopped);

    runtime.remove("bg").await.unwrap();
    assert!(!runtime.info().exists("bg"));
    assert!(host_dir.join("from-exec").is_file());
}
