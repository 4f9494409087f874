use std::borrow::Cow;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::{after, never, unbounded, Receiver, Sender};
use crossbeam::select;
use rand::Rng;

use crate::command::{log_cmd, quote};
use crate::Context;

/// Places `su` usually lives when it isn't on the PATH
pub const SU_LOCATIONS: &[&str] = &["/system/bin/su", "/system/xbin/su", "/sbin/su", "/su/bin/su"];

/// A unit of work for the root shell
#[derive(Clone, Debug, PartialEq)]
pub struct RootCommand {
    pub id: u32,
    pub command: String,
    pub timeout: Duration,
}

impl RootCommand {
    pub fn new<S: Into<String>>(id: u32, command: S, timeout: Duration) -> Self {
        Self {
            id,
            command: command.into(),
            timeout,
        }
    }
}

/// The outcome of a [RootCommand] that ran to completion
#[derive(Clone, Debug, PartialEq)]
pub struct CommandResult {
    pub id: u32,
    pub exit: i32,
    /// Captured stdout, one entry per line without the line terminator.
    /// Lines are kept as raw bytes, proc and sysfs files aren't always text.
    pub output: Vec<Vec<u8>>,
}

impl CommandResult {
    #[inline]
    pub fn ok(&self) -> bool {
        self.exit == 0
    }

    /// Output lines decoded for display, invalid UTF-8 is replaced
    pub fn lines(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.output.iter().map(|it| String::from_utf8_lossy(it))
    }

    /// The captured bytes with a `\n` after every line
    pub fn output_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.output.iter().map(|it| it.len() + 1).sum());
        for line in &self.output {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        out
    }

    /// [CommandResult::output_bytes] as text, for logs and error messages
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output_bytes()).into_owned()
    }

    pub fn err_on_status(self) -> crate::Result<Self> {
        if self.ok() {
            return Ok(self);
        }
        Err(crate::Error::CommandError(self.exit, self.output_string()))
    }
}

/// Access to an interactive root shell.
pub trait RootShell: Send + Sync {
    /// Best effort check for a `su` binary, this never asks for a root grant
    fn is_root_available(&self) -> bool;

    /// Make sure the shell is running as root, starting it if needed. This may
    /// trigger the root grant prompt on the device.
    fn check_access(&self) -> crate::Result<()>;

    /// Run the command, waiting at most `cmd.timeout` for it to finish.
    ///
    /// A command that doesn't finish in time, or is cancelled through the
    /// `cancel` channel, is abandoned and the session is restarted for the
    /// next command.
    fn execute_cancelable(
        &self,
        cmd: &RootCommand,
        cancel: Option<Receiver<()>>,
    ) -> crate::Result<CommandResult>;

    fn execute(&self, cmd: &RootCommand) -> crate::Result<CommandResult> {
        self.execute_cancelable(cmd, None)
    }

    /// Convenience wrapper for a one off command with id 0
    fn run(&self, command: &str, timeout: Duration) -> crate::Result<CommandResult> {
        self.execute(&RootCommand::new(0, command, timeout))
    }

    fn is_access_given(&self) -> bool {
        self.check_access().is_ok()
    }
}

enum SessionEvent {
    Completed {
        seq: u64,
        exit: i32,
        output: Vec<Vec<u8>>,
    },
    Closed,
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    token: String,
    events: Receiver<SessionEvent>,
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A [RootShell] backed by a single long lived `su` process.
///
/// Commands are written to the shell's stdin followed by an `echo` of a per
/// session marker that carries the command's exit status, the lines read
/// before the marker are the command's output.
pub struct SuShell {
    su: String,
    require_root: bool,
    access_timeout: Duration,
    seq: AtomicU64,
    session: Mutex<Option<Session>>,
}

impl SuShell {
    pub fn new<S: Into<String>>(su: S) -> Self {
        Self {
            su: su.into(),
            require_root: true,
            access_timeout: Duration::from_secs(20),
            seq: AtomicU64::new(1),
            session: Mutex::new(None),
        }
    }

    /// Create a shell with the configured `su` binary
    pub fn from_ctx(ctx: &dyn Context) -> crate::Result<Self> {
        let cfg = ctx.get_config()?;
        let su = ctx
            .maybe_get_bin(&cfg.root.su)
            .unwrap_or_else(|| cfg.root.su.clone());
        Ok(Self::new(su).with_access_timeout(cfg.root.timeout))
    }

    /// How long to wait for the user to answer the grant prompt
    pub fn with_access_timeout(mut self, timeout: Duration) -> Self {
        self.access_timeout = timeout;
        self
    }

    /// Don't insist on `uid=0`, only useful with a stand in for `su`
    pub fn without_root_check(mut self) -> Self {
        self.require_root = false;
        self
    }

    fn start_session(&self) -> crate::Result<Session> {
        log_cmd(&self.su, &[] as &[&str]);
        let mut child = match Command::new(&self.su)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::PermissionDenied => {
                log::debug!("can't start {}: {}", self.su, e);
                return Err(crate::Error::RootAccessDenied);
            }
            Err(e) => return Err(e.into()),
        };

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => {
                let _ = child.kill();
                return Err(crate::Error::new_generic("root shell pipes unavailable"));
            }
        };

        let mut rng = rand::thread_rng();
        let token = format!("__rootcompanion_{:016x}__", rng.gen::<u64>());

        let (tx, rx) = unbounded();
        let reader_token = token.clone();
        std::thread::spawn(move || read_session_output(stdout, &reader_token, tx));
        std::thread::spawn(move || log_session_stderr(stderr));

        let mut session = Session {
            child,
            stdin,
            token,
            events: rx,
        };

        if self.require_root {
            let res = self.submit(&mut session, "id", self.access_timeout, never());
            match res {
                Ok(res) if res.lines().any(|it| it.contains("uid=0")) => {}
                Ok(res) => {
                    log::warn!("root shell isn't root: {}", res.output_string().trim());
                    return Err(crate::Error::RootAccessDenied);
                }
                Err(e) => {
                    log::warn!("root shell failed the access check: {}", e);
                    return Err(crate::Error::RootAccessDenied);
                }
            }
        }

        Ok(session)
    }

    /// Get a running session, replacing one whose process went away
    fn ensure_session<'a>(&self, slot: &'a mut Option<Session>) -> crate::Result<&'a mut Session> {
        let alive = match slot.as_mut() {
            Some(sess) => matches!(sess.child.try_wait(), Ok(None)),
            None => false,
        };
        if !alive {
            *slot = None;
            *slot = Some(self.start_session()?);
        }
        slot.as_mut()
            .ok_or_else(|| crate::Error::new_generic("no root shell session"))
    }

    fn submit(
        &self,
        session: &mut Session,
        command: &str,
        timeout: Duration,
        cancel: Receiver<()>,
    ) -> crate::Result<CommandResult> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        log::debug!("root shell [{}]: {}", seq, command);

        let script = format!("{}\necho \"{} {} $?\"\n", command, session.token, seq);
        if let Err(e) = session
            .stdin
            .write_all(script.as_bytes())
            .and_then(|_| session.stdin.flush())
        {
            log::warn!("failed to write to root shell: {}", e);
            return Err(match e.kind() {
                ErrorKind::BrokenPipe => crate::Error::CommandError(-1, "root shell exited".into()),
                _ => e.into(),
            });
        }

        let deadline = after(timeout);
        loop {
            select! {
                recv(session.events) -> evt => match evt {
                    Ok(SessionEvent::Completed { seq: got, exit, output }) => {
                        if got != seq {
                            log::warn!("dropping output of stale root command {}", got);
                            continue;
                        }
                        return Ok(CommandResult { id: 0, exit, output });
                    }
                    Ok(SessionEvent::Closed) | Err(_) => {
                        return Err(crate::Error::CommandError(-1, "root shell exited".into()));
                    }
                },
                recv(cancel) -> _ => return Err(crate::Error::Cancelled),
                recv(deadline) -> _ => return Err(crate::Error::Timeout(timeout)),
            }
        }
    }
}

impl RootShell for SuShell {
    fn is_root_available(&self) -> bool {
        if which::which(&self.su).is_ok() || Path::new(&self.su).exists() {
            return true;
        }
        SU_LOCATIONS.iter().any(|it| Path::new(it).exists())
    }

    fn check_access(&self) -> crate::Result<()> {
        let mut guard = self.session.lock().expect("poisoned");
        self.ensure_session(&mut guard).map(|_| ())
    }

    fn execute_cancelable(
        &self,
        cmd: &RootCommand,
        cancel: Option<Receiver<()>>,
    ) -> crate::Result<CommandResult> {
        let mut guard = self.session.lock().expect("poisoned");
        let session = self.ensure_session(&mut guard)?;
        let res = self.submit(session, &cmd.command, cmd.timeout, cancel.unwrap_or_else(never));

        match res {
            Ok(mut res) => {
                res.id = cmd.id;
                Ok(res)
            }
            Err(e) => {
                // Whatever is still running owns the shell now, throw it away
                log::debug!("discarding root shell session after: {}", e);
                *guard = None;
                Err(e)
            }
        }
    }
}

/// Splits the session's stdout into per command results
fn read_session_output<R: Read>(stdout: R, token: &str, tx: Sender<SessionEvent>) {
    let mut reader = BufReader::new(stdout);
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("root shell read error: {}", e);
                break;
            }
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }

        match find_token(&buf, token.as_bytes()) {
            None => lines.push(buf.clone()),
            Some(idx) => {
                // Output without a trailing newline ends up in front of the marker
                if idx > 0 {
                    lines.push(buf[..idx].to_vec());
                }
                let marker = std::str::from_utf8(&buf[idx + token.len()..]).ok();
                let Some((seq, exit)) = marker.and_then(parse_marker) else {
                    log::error!("malformed root shell marker: {}", String::from_utf8_lossy(&buf));
                    continue;
                };
                let output = std::mem::take(&mut lines);
                if tx.send(SessionEvent::Completed { seq, exit, output }).is_err() {
                    return;
                }
            }
        }
    }

    let _ = tx.send(SessionEvent::Closed);
}

fn find_token(line: &[u8], token: &[u8]) -> Option<usize> {
    if token.is_empty() || line.len() < token.len() {
        return None;
    }
    line.windows(token.len()).position(|it| it == token)
}

fn parse_marker(rest: &str) -> Option<(u64, i32)> {
    let mut parts = rest.split_ascii_whitespace();
    let seq = parts.next()?.parse().ok()?;
    let exit = parts.next()?.parse().ok()?;
    Some((seq, exit))
}

fn log_session_stderr<R: Read>(stderr: R) {
    let reader = BufReader::new(stderr);
    for line in reader.split(b'\n') {
        match line {
            Ok(l) => log::debug!("root shell stderr: {}", String::from_utf8_lossy(&l)),
            Err(_) => break,
        }
    }
}

/// Shell snippet that reads `path` through `cat`
pub fn cat_command(path: &str) -> String {
    format!("cat {}", quote(path))
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam::channel::bounded;
    use std::time::Instant;

    fn sh_shell() -> SuShell {
        SuShell::new("sh").without_root_check()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_parse_marker() {
        assert_eq!(parse_marker(" 12 0"), Some((12, 0)));
        assert_eq!(parse_marker(" 3 127"), Some((3, 127)));
        assert_eq!(parse_marker(" x 0"), None);
        assert_eq!(parse_marker(""), None);
    }

    #[test]
    fn test_output_string() {
        let res = CommandResult {
            id: 1,
            exit: 0,
            output: vec![b"a".to_vec(), Vec::new(), b"b".to_vec()],
        };
        assert_eq!(res.output_string(), "a\n\nb\n");
        assert_eq!(res.lines().collect::<Vec<_>>(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_find_token() {
        assert_eq!(find_token(b"abc__tok__ 1 0", b"__tok__"), Some(3));
        assert_eq!(find_token(b"__tok__ 1 0", b"__tok__"), Some(0));
        assert_eq!(find_token(b"\xff__tok", b"__tok__"), None);
        assert_eq!(find_token(b"", b"__tok__"), None);
    }

    #[test]
    fn test_execute_captures_output() {
        let shell = sh_shell();
        let res = shell
            .execute(&RootCommand::new(7, "echo one; echo two", secs(5)))
            .expect("execute");
        assert_eq!(res.id, 7);
        assert!(res.ok());
        assert_eq!(res.output, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_exit_code() {
        let shell = sh_shell();
        let res = shell.run("echo nope; exit_code() { return 4; }; exit_code", secs(5));
        let res = res.expect("execute");
        assert_eq!(res.exit, 4);
        assert_eq!(res.output, vec![b"nope".to_vec()]);
        assert!(matches!(
            res.err_on_status(),
            Err(crate::Error::CommandError(4, _))
        ));
    }

    #[test]
    fn test_output_without_newline() {
        let shell = sh_shell();
        let res = shell.run("printf 'partial'", secs(5)).expect("execute");
        assert_eq!(res.output, vec![b"partial".to_vec()]);
    }

    #[test]
    fn test_non_utf8_output_is_preserved() {
        let shell = sh_shell();
        let res = shell.run("printf 'a\\377b\\n'", secs(5)).expect("execute");
        assert_eq!(res.output, vec![vec![b'a', 0xff, b'b']]);
        assert_eq!(res.output_bytes(), vec![97, 255, 98, 10]);
    }

    #[test]
    fn test_session_is_reused() {
        let shell = sh_shell();
        shell.run("ROOTCOMPANION_TEST_VAR=kept", secs(5)).expect("set var");
        let res = shell
            .run("echo $ROOTCOMPANION_TEST_VAR", secs(5))
            .expect("read var");
        assert_eq!(res.output, vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_timeout_restarts_session() {
        let shell = sh_shell();
        shell.run("ROOTCOMPANION_TEST_VAR=lost", secs(5)).expect("set var");

        let start = Instant::now();
        let res = shell.run("sleep 10", Duration::from_millis(200));
        assert!(matches!(res, Err(crate::Error::Timeout(_))));
        assert!(start.elapsed() < secs(5));

        let res = shell
            .run("echo \"[$ROOTCOMPANION_TEST_VAR]\"", secs(5))
            .expect("new session");
        assert_eq!(res.output, vec![b"[]".to_vec()]);
    }

    #[test]
    fn test_cancel() {
        let shell = sh_shell();
        let (tx, rx) = bounded(1);
        tx.send(()).unwrap();
        let res = shell.execute_cancelable(&RootCommand::new(1, "sleep 10", secs(5)), Some(rx));
        assert!(matches!(res, Err(crate::Error::Cancelled)));
        assert!(shell.run("true", secs(5)).expect("restarted").ok());
    }

    #[test]
    fn test_missing_su_is_denied() {
        let shell = SuShell::new("/nonexistent/bin/su");
        assert!(matches!(
            shell.check_access(),
            Err(crate::Error::RootAccessDenied)
        ));
        assert!(!shell.is_access_given());
    }

    #[test]
    fn test_su_that_exits_is_denied() {
        let shell = SuShell::new("true").with_access_timeout(secs(5));
        assert!(matches!(
            shell.run("id", secs(1)),
            Err(crate::Error::RootAccessDenied)
        ));
    }

    #[test]
    fn test_cat_command() {
        assert_eq!(
            cat_command("/sys/kernel/debug/wakeup_sources"),
            "cat '/sys/kernel/debug/wakeup_sources'"
        );
    }
}
