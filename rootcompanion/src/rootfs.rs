use std::time::Duration;

use crate::command::quote;
use crate::shell::{CommandResult, RootShell};
use crate::utils::device_parent;

pub const SYSTEM_MOUNT: &'static str = "/system";

/// File operations performed through a [RootShell].
///
/// The `Ok(bool)` results are what the shell reported, an `Err` means the
/// shell itself couldn't be used.
pub struct RootFs<'a> {
    shell: &'a dyn RootShell,
    timeout: Duration,
}

impl<'a> RootFs<'a> {
    pub fn new(shell: &'a dyn RootShell, timeout: Duration) -> Self {
        Self { shell, timeout }
    }

    fn run(&self, cmd: &str) -> crate::Result<CommandResult> {
        self.shell.run(cmd, self.timeout)
    }

    fn run_ok(&self, cmd: &str) -> crate::Result<bool> {
        let res = self.run(cmd)?;
        if !res.ok() {
            log::debug!(
                "`{}` exited with {}: {}",
                cmd,
                res.exit,
                res.output_string().trim()
            );
        }
        Ok(res.ok())
    }

    /// Remount /system read-write (or back to read-only).
    ///
    /// System-as-root devices only have `/` to remount, so that's tried when
    /// `/system` isn't its own mount point.
    pub fn remount_system(&self, rw: bool) -> crate::Result<bool> {
        let mode = if rw { "rw" } else { "ro" };
        let cmd = format!(
            "mount -o {mode},remount {sys} 2>/dev/null || mount -o {mode},remount /",
            sys = SYSTEM_MOUNT
        );
        self.run_ok(&cmd)
    }

    pub fn exists(&self, path: &str) -> crate::Result<bool> {
        self.run_ok(&format!("[ -e {} ]", quote(path)))
    }

    pub fn is_dir(&self, path: &str) -> crate::Result<bool> {
        self.run_ok(&format!("[ -d {} ]", quote(path)))
    }

    /// Copy `src` to `dst` as root, creating the destination's parent
    /// directory. With `preserve` the file mode (and so the executable bit)
    /// is kept.
    pub fn copy_file(&self, src: &str, dst: &str, remount: bool, preserve: bool) -> crate::Result<bool> {
        if remount && !self.remount_system(true)? {
            log::warn!("failed to remount {} read-write", SYSTEM_MOUNT);
        }

        let copied = self.copy_inner(src, dst, preserve);

        if remount && !self.remount_system(false)? {
            log::warn!("failed to remount {} read-only", SYSTEM_MOUNT);
        }

        copied
    }

    fn copy_inner(&self, src: &str, dst: &str, preserve: bool) -> crate::Result<bool> {
        if let Some(parent) = device_parent(dst) {
            if !parent.is_empty() && !self.run_ok(&format!("mkdir -p {}", quote(parent)))? {
                return Ok(false);
            }
        }

        let flags = if preserve { "-fp" } else { "-f" };
        if self.run_ok(&format!("cp {} {} {}", flags, quote(src), quote(dst)))? {
            return Ok(true);
        }

        // Toolbox builds without cp
        log::debug!("cp failed, falling back to cat for {}", src);
        if !self.run_ok(&format!("cat {} > {}", quote(src), quote(dst)))? {
            return Ok(false);
        }
        if preserve {
            let mode_cmd = format!(
                "chmod $(stat -c %a {}) {}",
                quote(src),
                quote(dst)
            );
            if !self.run_ok(&mode_cmd)? {
                log::warn!("copied {} but couldn't preserve its mode", src);
            }
        }
        Ok(true)
    }

    /// Recursively delete `path` as root. Succeeds only if the path is gone
    /// afterwards.
    pub fn delete(&self, path: &str, remount: bool) -> crate::Result<bool> {
        if remount && !self.remount_system(true)? {
            log::warn!("failed to remount {} read-write", SYSTEM_MOUNT);
        }

        let deleted = self.delete_inner(path);

        if remount && !self.remount_system(false)? {
            log::warn!("failed to remount {} read-only", SYSTEM_MOUNT);
        }

        deleted
    }

    fn delete_inner(&self, path: &str) -> crate::Result<bool> {
        if !self.exists(path)? {
            log::debug!("{} doesn't exist, nothing to delete", path);
            return Ok(false);
        }
        if !self.run_ok(&format!("rm -rf {}", quote(path)))? {
            return Ok(false);
        }
        Ok(!self.exists(path)?)
    }

    /// Names of the entries in `dir`
    pub fn list_dir(&self, dir: &str) -> crate::Result<Vec<String>> {
        let res = self.run(&format!("ls -a {}", quote(dir)))?.err_on_status()?;
        Ok(res
            .lines()
            .map(|it| it.trim().to_string())
            .filter(|it| !it.is_empty() && it != "." && it != "..")
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{mock_root_shell, result_with, MockRootShell};
    use rstest::*;
    use std::sync::{Arc, Mutex};

    fn recording_shell(
        shell: &mut MockRootShell,
        fail_on: &'static [&'static str],
    ) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&seen);
        shell.expect_execute_cancelable().returning(move |cmd, _| {
            inner.lock().unwrap().push(cmd.command.clone());
            let exit = if fail_on.iter().any(|f| cmd.command.starts_with(f)) {
                1
            } else {
                0
            };
            Ok(result_with(exit, &[]))
        });
        seen
    }

    #[rstest]
    fn test_copy_with_remount(mut mock_root_shell: MockRootShell) {
        let seen = recording_shell(&mut mock_root_shell, &[]);
        let fs = RootFs::new(&mock_root_shell, Duration::from_secs(1));

        let copied = fs
            .copy_file(
                "/data/app/com.example-1.apk",
                "/system/priv-app/Example/Example.apk",
                true,
                true,
            )
            .expect("copy");
        assert!(copied);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[
                "mount -o rw,remount /system 2>/dev/null || mount -o rw,remount /",
                "mkdir -p '/system/priv-app/Example'",
                "cp -fp '/data/app/com.example-1.apk' '/system/priv-app/Example/Example.apk'",
                "mount -o ro,remount /system 2>/dev/null || mount -o ro,remount /",
            ]
        );
    }

    #[rstest]
    fn test_copy_falls_back_to_cat(mut mock_root_shell: MockRootShell) {
        let seen = recording_shell(&mut mock_root_shell, &["cp "]);
        let fs = RootFs::new(&mock_root_shell, Duration::from_secs(1));

        assert!(fs.copy_file("/a/src", "/b/dst", false, true).expect("copy"));

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&"cat '/a/src' > '/b/dst'".to_string()));
        assert!(seen.iter().any(|it| it.starts_with("chmod $(stat")));
    }

    #[rstest]
    fn test_copy_failure(mut mock_root_shell: MockRootShell) {
        recording_shell(&mut mock_root_shell, &["cp ", "cat "]);
        let fs = RootFs::new(&mock_root_shell, Duration::from_secs(1));
        assert!(!fs.copy_file("/a/src", "/b/dst", false, false).expect("copy"));
    }

    #[rstest]
    fn test_delete_missing(mut mock_root_shell: MockRootShell) {
        let seen = recording_shell(&mut mock_root_shell, &["[ -e"]);
        let fs = RootFs::new(&mock_root_shell, Duration::from_secs(1));
        assert!(!fs.delete("/system/priv-app/gone.apk", false).expect("delete"));
        assert!(!seen.lock().unwrap().iter().any(|it| it.starts_with("rm ")));
    }

    #[rstest]
    fn test_list_dir(mut mock_root_shell: MockRootShell) {
        mock_root_shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "ls -a '/system/priv-app'")
            .returning(|_, _| Ok(result_with(0, &[".", "..", "Settings", "gsam-1.apk", ""])));
        let fs = RootFs::new(&mock_root_shell, Duration::from_secs(1));
        assert_eq!(
            fs.list_dir("/system/priv-app").expect("list"),
            vec!["Settings".to_string(), "gsam-1.apk".to_string()]
        );
    }

    #[rstest]
    fn test_root_denied_propagates(mut mock_root_shell: MockRootShell) {
        mock_root_shell
            .expect_execute_cancelable()
            .returning(|_, _| Err(crate::Error::RootAccessDenied));
        let fs = RootFs::new(&mock_root_shell, Duration::from_secs(1));
        assert!(matches!(
            fs.exists("/system"),
            Err(crate::Error::RootAccessDenied)
        ));
    }
}
