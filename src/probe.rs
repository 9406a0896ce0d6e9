//! Best-effort discovery of an installed JDK toolchain.
//!
//! The probe reads the immediate children of a versioned-install root
//! (`C:\Program Files\Java` style), picks the most recent `jdk*` entry, and
//! returns its `bin` directory so the session manager can prepend it to the
//! shell's PATH. Every filesystem error collapses to "not found" - the probe
//! runs on the spawn path and must never fail it.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::session::ShellKind;

/// Directory-name prefix that marks a JDK installation.
const JDK_PREFIX: &str = "jdk";

/// Platform default for the versioned-install root.
pub fn default_toolchain_root() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Program Files\Java")
    } else {
        PathBuf::from("/usr/lib/jvm")
    }
}

/// Locate the newest JDK under `root`, returning its `bin` directory.
///
/// Entries are ranked by numeric version components extracted from the name
/// (so `jdk-17` outranks `jdk-9`), with a lexicographic tiebreak. Only the
/// top-ranked entry is considered; if it has no `bin` subdirectory the probe
/// reports nothing rather than falling back to an older install.
pub fn locate(root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;

    let mut candidates: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with(JDK_PREFIX))
        .collect();

    candidates.sort_by(|a, b| {
        version_key(b)
            .cmp(&version_key(a))
            .then_with(|| b.cmp(a))
    });

    let newest = candidates.into_iter().next()?;
    let bin = root.join(&newest).join("bin");
    if bin.is_dir() {
        debug!(jdk = %newest, "toolchain probe found JDK");
        Some(bin)
    } else {
        debug!(jdk = %newest, "newest JDK has no bin directory");
        None
    }
}

/// Numeric version components of a directory name, e.g. `jdk-17.0.2` ->
/// `[17, 0, 2]` and `jdk1.8.0_281` -> `[1, 8, 0, 281]`.
fn version_key(name: &str) -> Vec<u64> {
    let mut components = Vec::new();
    let mut digits = String::new();
    for ch in name.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            components.push(digits.parse().unwrap_or(0));
            digits.clear();
        }
    }
    if !digits.is_empty() {
        components.push(digits.parse().unwrap_or(0));
    }
    components
}

/// Commands written into a fresh session to activate a discovered toolchain:
/// a PATH-prepend followed by a screen clear, in the dialect of the shell
/// driving the session.
pub fn activation_commands(shell: ShellKind, bin: &Path) -> [String; 2] {
    match shell {
        ShellKind::Cmd => [
            format!("set PATH={};%PATH%\r\n", bin.display()),
            "cls\r\n".to_string(),
        ],
        ShellKind::Posix => [
            format!("export PATH=\"{}:$PATH\"\n", bin.display()),
            "clear\n".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn mkjdk(root: &Path, name: &str, with_bin: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        if with_bin {
            fs::create_dir_all(dir.join("bin")).unwrap();
        }
    }

    #[test]
    fn picks_newest_of_padded_versions() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["jdk-17", "jdk-8", "jdk-21"] {
            mkjdk(tmp.path(), name, true);
        }

        let bin = locate(tmp.path()).unwrap();
        assert_eq!(bin, tmp.path().join("jdk-21").join("bin"));
    }

    #[test]
    fn orders_versions_numerically_not_lexicographically() {
        let tmp = tempfile::tempdir().unwrap();
        mkjdk(tmp.path(), "jdk-9", true);
        mkjdk(tmp.path(), "jdk-17", true);

        let bin = locate(tmp.path()).unwrap();
        assert_eq!(bin, tmp.path().join("jdk-17").join("bin"));
    }

    #[test]
    fn ignores_entries_without_the_jdk_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        mkjdk(tmp.path(), "jre-99", true);
        mkjdk(tmp.path(), "jdk-11", true);

        let bin = locate(tmp.path()).unwrap();
        assert_eq!(bin, tmp.path().join("jdk-11").join("bin"));
    }

    #[test]
    fn newest_without_bin_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        mkjdk(tmp.path(), "jdk-11", true);
        mkjdk(tmp.path(), "jdk-21", false);

        assert_eq!(locate(tmp.path()), None);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(locate(&tmp.path().join("no-such-dir")), None);
    }

    #[test]
    fn version_key_extracts_numeric_runs() {
        assert_eq!(version_key("jdk-17.0.2"), vec![17, 0, 2]);
        assert_eq!(version_key("jdk1.8.0_281"), vec![1, 8, 0, 281]);
        assert_eq!(version_key("jdk"), Vec::<u64>::new());
    }

    #[test]
    fn activation_commands_match_shell_dialect() {
        let bin = Path::new("/usr/lib/jvm/jdk-21/bin");
        let [path_cmd, clear_cmd] = activation_commands(ShellKind::Posix, bin);
        assert_eq!(path_cmd, "export PATH=\"/usr/lib/jvm/jdk-21/bin:$PATH\"\n");
        assert_eq!(clear_cmd, "clear\n");

        let [path_cmd, clear_cmd] = activation_commands(ShellKind::Cmd, bin);
        assert!(path_cmd.starts_with("set PATH="));
        assert!(path_cmd.ends_with(";%PATH%\r\n"));
        assert_eq!(clear_cmd, "cls\r\n");
    }
}
