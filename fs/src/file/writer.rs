use super::super::utils::{validate_path, FsError};
use super::super::LocalFile;
use std::io::Write;
use std::path::Path;
use std::{fs, io};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("error creating file: {0}")]
    ErrorCreatingFile(#[from] io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] FsError),
}

pub trait FileWriter {
    fn write(&self, path: &Path, buf: String) -> Result<(), WriteError>;
}

impl FileWriter for LocalFile {
    /// Write `content` to `path`, truncating any previous contents.
    /// On Unix the file is created with mode 0600.
    #[instrument(skip_all, fields(path = %path.display()))]
    fn write(&self, path: &Path, content: String) -> Result<(), WriteError> {
        validate_path(path)?;

        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);

        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        options.open(path)?.write_all(content.as_bytes())?;

        #[cfg(target_family = "windows")]
        crate::win_permissions::set_file_permissions_for_administrator(path)
            .map_err(|err| WriteError::ErrorCreatingFile(io::Error::other(err.to_string())))?;

        Ok(())
    }
}

#[cfg(feature = "mocks")]
pub mod mock {
    use super::*;
    use crate::mock::MockLocalFile;
    use mockall::predicate;

    impl MockLocalFile {
        pub fn should_write(&mut self, path: &Path, content: String) {
            let path_clone = path.to_path_buf();
            self.expect_write()
                .with(predicate::eq(path_clone), predicate::eq(content))
                .once()
                .returning(|_, _| Ok(()));
        }

        pub fn should_write_any(&mut self, times: usize) {
            self.expect_write().times(times).returning(|_, _| Ok(()));
        }
    }
}
