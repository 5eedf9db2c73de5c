use super::super::LocalFile;
use std::fs::remove_file;
use std::io;
use std::path::Path;

pub trait FileDeleter {
    fn delete(&self, file_path: &Path) -> io::Result<()>;
}

impl FileDeleter for LocalFile {
    fn delete(&self, file_path: &Path) -> io::Result<()> {
        if !file_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}", file_path.display()),
            ));
        }

        remove_file(file_path)
    }
}

#[cfg(feature = "mocks")]
pub mod mock {
    use crate::mock::MockLocalFile;
    use mockall::predicate;
    use std::path::{Path, PathBuf};

    impl MockLocalFile {
        pub fn should_delete(&mut self, path: &Path) {
            self.expect_delete()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(|_| Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_missing_file_is_an_error() {
        let result = LocalFile.delete(Path::new("/a/path/that/does/not/exist"));
        assert!(result.is_err());
    }

    #[test]
    fn deletes_existing_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("some_file");
        std::fs::write(&path, "x").unwrap();

        assert!(LocalFile.delete(&path).is_ok());
        assert!(!path.exists());
    }
}
