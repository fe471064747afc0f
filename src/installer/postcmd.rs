//! Post-installation command interpretation.
//!
//! Packages finish with a handful of Windows shell commands. Only the
//! `cmd.exe /C del <path>` and `cmd.exe /C ren <old> <new>` forms are
//! recognized; they are applied natively rather than through a shell.
//! Failures are counted, never raised.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::config::InstallConfig;
use super::resolver::LocationResolver;
use crate::manifest::PostCommand;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PostCommandStats {
    pub applied: usize,
    pub failed: usize,
}

/// Run every post-command against the filesystem.
pub fn run_post_commands(commands: &[PostCommand], config: &InstallConfig) -> PostCommandStats {
    let resolver = LocationResolver::new(config);
    let mut stats = PostCommandStats::default();

    for command in commands {
        let expanded = resolver.expand(&command.command);
        match apply_command(&expanded) {
            Ok(action) => {
                info!("Post-command: {action}");
                stats.applied += 1;
            }
            Err(reason) => {
                warn!("Post-command failed ({}): {reason}", command.command);
                stats.failed += 1;
            }
        }
    }

    stats
}

/// Apply one expanded command line. Returns a description of what was done,
/// or the failure reason.
fn apply_command(expanded: &str) -> Result<String, String> {
    if !expanded.to_lowercase().contains("cmd.exe") {
        return Err("not a cmd.exe invocation".to_string());
    }
    let payload = split_after_cmd_flag(expanded)
        .ok_or_else(|| "no /C payload".to_string())?
        .trim();

    let tokens = tokenize(payload);
    match tokens.first().map(|t| t.to_lowercase()) {
        Some(verb) if verb == "del" => {
            let [path] = &tokens[1..] else {
                return Err(format!("del expects one path, got {}", tokens.len() - 1));
            };
            apply_del(Path::new(path))
        }
        Some(verb) if verb == "ren" => {
            let [old, new] = &tokens[1..] else {
                return Err(format!("ren expects two arguments, got {}", tokens.len() - 1));
            };
            apply_ren(Path::new(old), new)
        }
        Some(other) => Err(format!("unrecognized verb '{other}'")),
        None => Err("empty payload".to_string()),
    }
}

/// Delete a file; a file that is already absent counts as success.
fn apply_del(path: &Path) -> Result<String, String> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(format!("deleted {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(format!("already absent: {}", path.display()))
        }
        Err(e) => Err(format!("cannot delete {}: {e}", path.display())),
    }
}

/// Rename a file to a sibling carrying the new name, overwriting any
/// existing file of that name.
fn apply_ren(old: &Path, new_name: &str) -> Result<String, String> {
    // Only the filename of the second argument matters
    let new_name = Path::new(new_name)
        .file_name()
        .ok_or_else(|| format!("invalid new name '{new_name}'"))?;
    let target: PathBuf = match old.parent() {
        Some(parent) => parent.join(new_name),
        None => PathBuf::from(new_name),
    };
    match std::fs::rename(old, &target) {
        Ok(()) => Ok(format!("renamed {} -> {}", old.display(), target.display())),
        Err(e) => Err(format!(
            "cannot rename {} -> {}: {e}",
            old.display(),
            target.display()
        )),
    }
}

/// Everything after the first `/C` (or `/c`) flag.
fn split_after_cmd_flag(command: &str) -> Option<&str> {
    for flag in ["/C", "/c"] {
        if let Some(idx) = command.find(flag) {
            return Some(&command[idx + flag.len()..]);
        }
    }
    None
}

/// Split a payload into tokens, honoring double quotes.
fn tokenize(payload: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in payload.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn command(text: &str) -> PostCommand {
        PostCommand {
            command: text.to_string(),
            wait: true,
            hidden: true,
        }
    }

    fn config_for(dest: &Path) -> InstallConfig {
        InstallConfig {
            destination: dest.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_del_existing_file() {
        let temp = tempdir().unwrap();
        let victim = temp.path().join("leftover.esp");
        std::fs::write(&victim, b"x").unwrap();

        let stats = run_post_commands(
            &[command("cmd.exe /C del \"%DESTINATION%\\leftover.esp\"")],
            &config_for(temp.path()),
        );
        assert_eq!(stats, PostCommandStats { applied: 1, failed: 0 });
        assert!(!victim.exists());
    }

    #[test]
    fn test_del_absent_file_silently_succeeds() {
        let temp = tempdir().unwrap();
        let stats = run_post_commands(
            &[command("cmd.exe /C del %DESTINATION%\\never_existed.esp")],
            &config_for(temp.path()),
        );
        assert_eq!(stats, PostCommandStats { applied: 1, failed: 0 });
    }

    #[test]
    fn test_ren_moves_to_sibling_and_overwrites() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("old.esp"), b"new content").unwrap();
        std::fs::write(temp.path().join("new.esp"), b"stale").unwrap();

        let stats = run_post_commands(
            &[command(
                "cmd.exe /C ren \"%DESTINATION%\\old.esp\" new.esp",
            )],
            &config_for(temp.path()),
        );
        assert_eq!(stats, PostCommandStats { applied: 1, failed: 0 });
        assert!(!temp.path().join("old.esp").exists());
        assert_eq!(
            std::fs::read(temp.path().join("new.esp")).unwrap(),
            b"new content"
        );
    }

    #[test]
    fn test_unrecognized_payload_counts_as_failure() {
        let temp = tempdir().unwrap();
        let commands = [
            command("cmd.exe /C copy a b"),
            command("powershell Remove-Item x"),
            command("cmd.exe del-without-flag"),
        ];
        let stats = run_post_commands(&commands, &config_for(temp.path()));
        assert_eq!(stats, PostCommandStats { applied: 0, failed: 3 });
    }

    #[test]
    fn test_expansion_only_when_configured() {
        let temp = tempdir().unwrap();
        // %FO3ROOT% unset: stays literal and the delete fails quietly as
        // an absent path under the (nonexistent) literal directory
        let stats = run_post_commands(
            &[command("cmd.exe /C del \"%FO3ROOT%\\x.esp\"")],
            &config_for(temp.path()),
        );
        // Deleting a nonexistent path is still "already absent"
        assert_eq!(stats.applied, 1);
    }

    #[test]
    fn test_tokenize_quoted_paths() {
        let tokens = tokenize("ren \"C:/with space/old name.esp\" \"new name.esp\"");
        assert_eq!(
            tokens,
            vec!["ren", "C:/with space/old name.esp", "new name.esp"]
        );
    }
}
