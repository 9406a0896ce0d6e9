//! Shell session lifecycle management.
//!
//! A [`SessionManager`] owns at most one live child shell at a time, bound
//! to a project working directory. The child handle never leaves the
//! manager: consumers interact only through `write` and the broadcast event
//! stream, so there is exactly one place that can kill or feed the process.
//!
//! Lifecycle is `Absent -> Spawning -> Live -> Dying -> Absent`. `rebind`
//! serializes through an async mutex, so rapid project switches queue up
//! instead of racing - the final live session always belongs to the last
//! caller, and kill awaits the OS exit notification before the replacement
//! spawns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::probe;
use crate::relay::{self, ChunkSource, SessionEvent, EVENT_CHANNEL_CAPACITY};

/// Grace period for a SIGTERM'd shell to exit before it is killed hard.
#[cfg(unix)]
const TERM_GRACE: Duration = Duration::from_millis(200);

/// How long to wait for reader tasks to drain after the child dies.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Delay before the no-op newline that forces a prompt redraw in a fresh
/// session. Cosmetic only - nothing waits on it.
const PROMPT_KICK_DELAY: Duration = Duration::from_millis(500);

/// Session lifecycle states. Only `Live` accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Spawning,
    Live,
    Dying,
}

/// Dialect family of the shell driving a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// Windows command interpreter (`cmd.exe`).
    Cmd,
    /// POSIX-style shell (`bash`, `sh`, `zsh`, ...).
    Posix,
}

impl ShellKind {
    /// Classify a shell program by its file name.
    pub fn of(program: &str) -> Self {
        let name = program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(program)
            .to_ascii_lowercase();
        if name == "cmd" || name == "cmd.exe" {
            ShellKind::Cmd
        } else {
            ShellKind::Posix
        }
    }

    /// The line terminator this shell expects on its input stream.
    pub fn newline(self) -> &'static str {
        match self {
            ShellKind::Cmd => "\r\n",
            ShellKind::Posix => "\n",
        }
    }
}

struct LiveSession {
    child: Child,
    stdin: ChildStdin,
    working_dir: PathBuf,
    readers: Vec<JoinHandle<()>>,
}

struct Inner {
    state: SessionState,
    session: Option<LiveSession>,
}

struct Shared {
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
    config: Config,
    shell: String,
    kind: ShellKind,
}

/// Cheaply cloneable handle to the single shell session of one window.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shell = config.terminal.shell_program();
        let kind = ShellKind::of(&shell);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Absent,
                    session: None,
                }),
                events,
                config,
                shell,
                kind,
            }),
        }
    }

    /// Subscribe to the ordered session event stream. Every subscriber sees
    /// the same sequence; subscriptions survive rebinds because the channel
    /// belongs to the manager, not to any one child process.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Dialect of the shell this manager spawns.
    pub fn shell_kind(&self) -> ShellKind {
        self.shared.kind
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Working directory of the live session, if one exists.
    pub async fn working_dir(&self) -> Option<PathBuf> {
        let inner = self.shared.inner.lock().await;
        inner.session.as_ref().map(|s| s.working_dir.clone())
    }

    /// Start a shell rooted at `dir`. Spawn failure is silent by contract:
    /// the session stays `Absent` and the terminal simply shows nothing.
    pub async fn spawn(&self, dir: &Path) -> SessionState {
        let mut inner = self.shared.inner.lock().await;
        self.kill_locked(&mut inner).await;
        self.spawn_locked(&mut inner, dir).await;
        inner.state
    }

    /// Forward raw input bytes to the live session's stdin. A write against
    /// anything but a live, writable stream is dropped silently - never an
    /// error, never a panic, even mid-teardown.
    pub async fn write(&self, bytes: &[u8]) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != SessionState::Live {
            debug!("write dropped: no live session");
            return;
        }
        if let Some(session) = inner.session.as_mut() {
            if session.stdin.write_all(bytes).await.is_err() {
                debug!("write dropped: stdin closed");
                return;
            }
            let _ = session.stdin.flush().await;
        }
    }

    /// Terminate the live session, if any. Idempotent; awaits the OS exit
    /// notification and reader shutdown so no handle or zombie is left.
    pub async fn kill(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.kill_locked(&mut inner).await;
    }

    /// Tear down the current session and spawn a fresh one at `dir`,
    /// replaying the environment probe and announcing the switch.
    ///
    /// Concurrent rebinds serialize on the session lock in FIFO order, so
    /// back-to-back project switches leave exactly one live session, bound
    /// to the directory of the last call.
    pub async fn rebind(&self, dir: &Path) -> SessionState {
        let mut inner = self.shared.inner.lock().await;
        info!(dir = %dir.display(), "rebinding session");
        self.kill_locked(&mut inner).await;
        self.spawn_locked(&mut inner, dir).await;
        if inner.state == SessionState::Live {
            let _ = self.shared.events.send(SessionEvent::DirectorySynchronized {
                path: dir.to_path_buf(),
            });
        }
        inner.state
    }

    async fn spawn_locked(&self, inner: &mut Inner, dir: &Path) {
        inner.state = SessionState::Spawning;

        // Probe for a toolchain before the shell starts; errors collapse to
        // "not found" and must never block the spawn path.
        let toolchain_bin = if self.shared.config.probe.enabled {
            let root = self
                .shared
                .config
                .probe
                .root
                .clone()
                .unwrap_or_else(probe::default_toolchain_root);
            probe::locate(&root)
        } else {
            None
        };

        let mut cmd = Command::new(&self.shared.shell);
        cmd.current_dir(dir)
            .env("TERM", "xterm-256color")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(shell = %self.shared.shell, %err, "failed to spawn shell");
                inner.state = SessionState::Absent;
                return;
            }
        };

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            warn!("spawned shell is missing a stdio pipe");
            let _ = child.start_kill();
            inner.state = SessionState::Absent;
            return;
        };

        let readers = vec![
            relay::spawn_reader(stdout, ChunkSource::Stdout, self.shared.events.clone(), true),
            relay::spawn_reader(stderr, ChunkSource::Stderr, self.shared.events.clone(), false),
        ];

        // Activate the discovered toolchain inside the fresh session before
        // any user input reaches it.
        if let Some(bin) = &toolchain_bin {
            for command in probe::activation_commands(self.shared.kind, bin) {
                if stdin.write_all(command.as_bytes()).await.is_err() {
                    warn!("toolchain activation write dropped");
                    break;
                }
            }
            let _ = stdin.flush().await;
        }

        inner.session = Some(LiveSession {
            child,
            stdin,
            working_dir: dir.to_path_buf(),
            readers,
        });
        inner.state = SessionState::Live;
        info!(shell = %self.shared.shell, dir = %dir.display(), "session live");

        if let Some(bin) = toolchain_bin {
            let _ = self
                .shared
                .events
                .send(SessionEvent::EnvironmentDiscovered { bin_path: bin });
        }

        self.schedule_prompt_kick();
    }

    async fn kill_locked(&self, inner: &mut Inner) {
        let Some(mut session) = inner.session.take() else {
            inner.state = SessionState::Absent;
            return;
        };
        inner.state = SessionState::Dying;
        debug!("killing session");

        // Close stdin first so a well-behaved shell can exit on its own.
        drop(session.stdin);

        #[cfg(unix)]
        {
            if let Some(pid) = session.child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                if tokio::time::timeout(TERM_GRACE, session.child.wait())
                    .await
                    .is_err()
                {
                    let _ = session.child.start_kill();
                }
            } else {
                let _ = session.child.start_kill();
            }
        }
        #[cfg(not(unix))]
        {
            let _ = session.child.start_kill();
        }

        // The exit notification, not a timer, is what gates the respawn.
        let _ = session.child.wait().await;

        // Let the relay drain remaining output so a replacement session
        // cannot interleave ahead of it.
        for mut reader in session.readers {
            if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        inner.state = SessionState::Absent;
        debug!("session torn down");
    }

    /// After a short delay, write a no-op newline so the shell redraws its
    /// prompt once the activation commands have run.
    fn schedule_prompt_kick(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PROMPT_KICK_DELAY).await;
            manager.write(manager.shared.kind.newline().as_bytes()).await;
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{Config, ProbeConfig, TerminalConfig};
    use std::time::Instant;

    fn test_config() -> Config {
        Config {
            terminal: TerminalConfig {
                shell: Some("sh".to_string()),
            },
            probe: ProbeConfig {
                enabled: false,
                root: None,
            },
            ..Config::default()
        }
    }

    /// Drain output events until `needle` shows up or the deadline passes.
    async fn wait_for_text(
        rx: &mut broadcast::Receiver<SessionEvent>,
        needle: &str,
    ) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = String::new();
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Ok(SessionEvent::Output(chunk))) => {
                    seen.push_str(&chunk.text);
                    if seen.contains(needle) {
                        return Some(seen);
                    }
                }
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => {}
            }
        }
        None
    }

    #[tokio::test]
    async fn spawn_then_kill_ends_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());

        assert_eq!(manager.spawn(tmp.path()).await, SessionState::Live);
        manager.kill().await;
        assert_eq!(manager.state().await, SessionState::Absent);
        assert!(manager.working_dir().await.is_none());
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let manager = SessionManager::new(test_config());
        manager.kill().await;
        manager.kill().await;
        assert_eq!(manager.state().await, SessionState::Absent);
    }

    #[tokio::test]
    async fn spawn_failure_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.terminal.shell = Some("galaxy-no-such-shell".to_string());
        let manager = SessionManager::new(config);

        assert_eq!(manager.spawn(tmp.path()).await, SessionState::Absent);
        // a write against the absent session is a no-op
        manager.write(b"echo hi\n").await;
    }

    #[tokio::test]
    async fn output_arrives_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());
        let mut rx = manager.subscribe();

        manager.spawn(tmp.path()).await;
        manager.write(b"echo a; echo b; echo c\n").await;

        let seen = wait_for_text(&mut rx, "c").await.expect("shell output");
        let a = seen.find('a').unwrap();
        let b = seen.find('b').unwrap();
        let c = seen.find('c').unwrap();
        assert!(a < b && b < c, "order violated: {seen:?}");

        manager.kill().await;
    }

    #[tokio::test]
    async fn write_racing_teardown_does_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());
        manager.spawn(tmp.path()).await;

        let writer = manager.clone();
        let write = tokio::spawn(async move {
            for _ in 0..50 {
                writer.write(b"echo x\n").await;
            }
        });
        manager.kill().await;
        write.await.unwrap();
        assert_eq!(manager.state().await, SessionState::Absent);
    }

    #[tokio::test]
    async fn rebind_moves_to_the_new_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());
        let mut rx = manager.subscribe();

        manager.rebind(first.path()).await;
        assert_eq!(manager.rebind(second.path()).await, SessionState::Live);
        assert_eq!(manager.working_dir().await.as_deref(), Some(second.path()));

        manager.write(b"pwd\n").await;
        let canonical = second.path().canonicalize().unwrap();
        let seen = wait_for_text(&mut rx, &canonical.display().to_string()).await;
        assert!(seen.is_some(), "pwd output should name the new directory");

        manager.kill().await;
    }

    #[tokio::test]
    async fn concurrent_rebinds_leave_the_last_directory_live() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());

        let m1 = manager.clone();
        let m2 = manager.clone();
        let (d1, d2) = (first.path().to_path_buf(), second.path().to_path_buf());
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { m1.rebind(&d1).await }),
            tokio::spawn(async move { m2.rebind(&d2).await }),
        );
        r1.unwrap();
        r2.unwrap();

        // exactly one session, bound to one of the two directories - and
        // still fully live and usable
        assert_eq!(manager.state().await, SessionState::Live);
        let dir = manager.working_dir().await.expect("live session");
        assert!(dir == first.path() || dir == second.path());

        manager.kill().await;
        assert_eq!(manager.state().await, SessionState::Absent);
    }

    #[tokio::test]
    async fn rebind_announces_the_new_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());
        let mut rx = manager.subscribe();

        manager.rebind(tmp.path()).await;

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut announced = false;
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Ok(SessionEvent::DirectorySynchronized { path })) => {
                    assert_eq!(path, tmp.path());
                    announced = true;
                    break;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                _ => {}
            }
        }
        assert!(announced, "rebind should announce the directory switch");

        manager.kill().await;
    }

    #[tokio::test]
    async fn probe_activates_toolchain_in_fresh_session() {
        let project = tempfile::tempdir().unwrap();
        let toolchain = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(toolchain.path().join("jdk-21").join("bin")).unwrap();

        let mut config = test_config();
        config.probe = ProbeConfig {
            enabled: true,
            root: Some(toolchain.path().to_path_buf()),
        };
        let manager = SessionManager::new(config);
        let mut rx = manager.subscribe();

        manager.spawn(project.path()).await;

        let expected_bin = toolchain.path().join("jdk-21").join("bin");
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut discovered = false;
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Ok(SessionEvent::EnvironmentDiscovered { bin_path })) => {
                    assert_eq!(bin_path, expected_bin);
                    discovered = true;
                    break;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                _ => {}
            }
        }
        assert!(discovered, "probe should announce the discovered toolchain");

        // The PATH export ran inside the session itself.
        manager.write(b"echo \"$PATH\"\n").await;
        let seen = wait_for_text(&mut rx, &expected_bin.display().to_string()).await;
        assert!(seen.is_some(), "session PATH should contain the toolchain bin");

        manager.kill().await;
    }

    #[tokio::test]
    async fn shell_exit_emits_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config());
        let mut rx = manager.subscribe();

        manager.spawn(tmp.path()).await;
        manager.write(b"exit\n").await;

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut closed = false;
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Ok(SessionEvent::Closed)) => {
                    closed = true;
                    break;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                _ => {}
            }
        }
        assert!(closed, "shell exit should surface a Closed event");
    }

    #[test]
    fn shell_kind_classification() {
        assert_eq!(ShellKind::of("cmd.exe"), ShellKind::Cmd);
        assert_eq!(ShellKind::of(r"C:\Windows\System32\cmd.exe"), ShellKind::Cmd);
        assert_eq!(ShellKind::of("bash"), ShellKind::Posix);
        assert_eq!(ShellKind::of("/usr/bin/zsh"), ShellKind::Posix);
    }
}
