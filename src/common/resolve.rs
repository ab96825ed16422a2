use std::path::{Path, PathBuf};

use crate::common::Error;
use crate::system::can_execute;

/// Turn the command as given on our own command line into a launchable path.
///
/// A bare name is looked up in `PATH`, which is what the eventual `execvp`
/// would do anyway; doing it here lets us fail before any resource exists.
pub(crate) fn resolve_command(command: &Path) -> Result<PathBuf, Error> {
    if command.components().count() > 1 {
        if !command.is_file() {
            return Err(Error::CommandNotFound(command.to_path_buf()));
        }
        if !can_execute(command) {
            return Err(Error::InvalidCommand(command.to_path_buf()));
        }
        Ok(command.to_path_buf())
    } else {
        let path = std::env::var("PATH").unwrap_or_default();
        resolve_path(command, &path).ok_or_else(|| Error::CommandNotFound(command.to_path_buf()))
    }
}

fn resolve_path(command: &Path, path: &str) -> Option<PathBuf> {
    path.split(':')
        .map(Path::new)
        // ignore all relative paths ("", "." or "./")
        .filter(|path| path.is_absolute())
        // construct a possible executable absolute path candidate
        .map(|path| path.join(command))
        // check whether the candidate is a regular file and any executable flag is set
        .find(|path| path.is_file() && can_execute(path))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{resolve_command, resolve_path};
    use crate::common::Error;

    #[test]
    fn test_resolve_path() {
        // Assume any linux distro has utilities in this PATH
        let path = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

        assert!(resolve_path(&PathBuf::from("sh"), path).is_some());
        assert!(resolve_path(&PathBuf::from("sh"), "").is_none());
        assert!(resolve_path(&PathBuf::from("thisisnotonyourfs"), path).is_none());

        // only absolute path entries are considered
        assert!(resolve_path(&PathBuf::from("sh"), "./relative::/bin").is_some());
        assert!(resolve_path(&PathBuf::from("sh"), "./relative:.").is_none());
    }

    #[test]
    fn test_resolve_command() {
        assert!(resolve_command(Path::new("sh")).is_ok());
        assert!(matches!(
            resolve_command(Path::new("thisisnotonyourfs")),
            Err(Error::CommandNotFound(_))
        ));
        assert!(matches!(
            resolve_command(Path::new("/does/not/exist")),
            Err(Error::CommandNotFound(_))
        ));
        // a regular file without the executable bit is rejected, not launched
        assert!(matches!(
            resolve_command(Path::new("/etc/hostname")),
            Err(Error::InvalidCommand(_)) | Err(Error::CommandNotFound(_))
        ));
    }
}
