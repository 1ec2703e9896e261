#![allow(dead_code)]

use std::time::Duration;

use assert_cmd::Command;
use nsattach_test_utils::TestLxcPath;

/// A private lxcpath plus a command builder pointed at it.
///
/// Containers left running by a test are stopped on drop.
pub struct TestContext {
    pub cmd: Command,
    pub lxc: TestLxcPath,
}

impl TestContext {
    pub fn new_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_nsattach");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        cmd.arg("--lxcpath").arg(self.lxc.path());
        cmd
    }

    /// Define and start a container whose init sleeps.
    pub fn running(&self, name: &str) {
        self.new_cmd().args(["create", name]).assert().success();
        self.new_cmd()
            .args(["start", name, "--", "sleep", "3600"])
            .assert()
            .success();
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let Ok(entries) = std::fs::read_dir(self.lxc.path()) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.path().join("init.pid").exists() {
                let _ = self
                    .new_cmd()
                    .arg("stop")
                    .arg(entry.file_name())
                    .ok();
            }
        }
    }
}

pub fn nsattach() -> TestContext {
    let lxc = TestLxcPath::new();

    let bin_path: &str = env!("CARGO_BIN_EXE_nsattach");
    let mut cmd = Command::new(bin_path);
    // You can override this with .timeout(Duration::from_secs(N))
    cmd.timeout(Duration::from_secs(30));
    cmd.arg("--lxcpath").arg(lxc.path());

    TestContext { cmd, lxc }
}
