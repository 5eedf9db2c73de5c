use super::utils::validate_path;
use std::fs::{remove_dir_all, DirBuilder};
use std::io;
use std::path::Path;
use tracing::instrument;

pub trait DirectoryManager {
    /// Create the directory, including any missing parents.
    fn create(&self, path: &Path) -> io::Result<()>;

    /// Delete the directory and its contents. Not an error if the directory
    /// does not exist.
    fn delete(&self, path: &Path) -> io::Result<()>;
}

#[derive(Clone)]
pub struct DirectoryManagerFs;

impl DirectoryManager for DirectoryManagerFs {
    fn create(&self, path: &Path) -> io::Result<()> {
        validate_path(path)?;
        let mut directory_builder = DirBuilder::new();
        directory_builder.recursive(true);

        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::DirBuilderExt;

            directory_builder.mode(0o700);
        }

        directory_builder.create(path)?;

        #[cfg(target_family = "windows")]
        crate::win_permissions::set_file_permissions_for_administrator(path).map_err(|err| {
            io::Error::other(format!(
                "failed to set windows permissions for {}: {}",
                path.display(),
                err
            ))
        })?;

        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn delete(&self, path: &Path) -> io::Result<()> {
        validate_path(path)?;

        if !path.exists() {
            return Ok(());
        }
        remove_dir_all(path)
    }
}

#[cfg(feature = "mocks")]
pub mod mock {
    use super::*;
    use mockall::{mock, predicate};
    use std::path::PathBuf;

    mock! {
        pub DirectoryManager {}

        impl DirectoryManager for DirectoryManager {
            fn create(&self, path: &Path) -> io::Result<()>;
            fn delete(&self, path: &Path) -> io::Result<()>;
        }
        impl Clone for DirectoryManager {
            fn clone(&self) -> Self;
        }
    }

    impl MockDirectoryManager {
        pub fn should_create(&mut self, path: &Path) {
            let path_clone = PathBuf::from(path);
            self.expect_create()
                .with(predicate::eq(path_clone))
                .once()
                .returning(|_| Ok(()));
        }

        pub fn should_delete(&mut self, path: &Path) {
            let path_clone = PathBuf::from(path);
            self.expect_delete()
                .with(predicate::eq(path_clone))
                .once()
                .returning(|_| Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn path_to_create_cannot_contain_dots() {
        let path = PathBuf::from("some/path/../with/../dots");
        let result = DirectoryManagerFs.create(&path);
        assert!(result.is_err());
    }

    #[test]
    fn folder_creation_is_idempotent() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("nested/dir");

        let manager = DirectoryManagerFs;
        assert!(manager.create(&path).is_ok());
        assert!(manager.create(&path).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn delete_of_missing_directory_is_not_an_error() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("never_created");
        assert!(DirectoryManagerFs.delete(&path).is_ok());
    }
}
