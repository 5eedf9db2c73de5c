use super::super::LocalFile;
use std::fs::{self, read_dir};
use std::io;
use std::path::{Path, PathBuf};

pub trait FileReader {
    /// Read the contents of `file_path` and return them as a string.
    fn read(&self, file_path: &Path) -> io::Result<String>;

    /// List the entries inside `dir_path`.
    fn dir_entries(&self, dir_path: &Path) -> io::Result<Vec<PathBuf>>;
}

impl FileReader for LocalFile {
    fn read(&self, file_path: &Path) -> io::Result<String> {
        if !file_path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found or not a file: {}", file_path.display()),
            ));
        }

        let file_contents = fs::read(file_path)?;
        String::from_utf8(file_contents).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("UTF-8 decoding error: {e}"))
        })
    }

    fn dir_entries(&self, dir_path: &Path) -> io::Result<Vec<PathBuf>> {
        if !dir_path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found or not a directory: {}", dir_path.display()),
            ));
        }
        let files = read_dir(dir_path)?;
        let mut file_paths = Vec::new();
        for entry in files {
            file_paths.push(entry?.path());
        }
        Ok(file_paths)
    }
}

#[cfg(feature = "mocks")]
pub mod mock {
    use super::*;
    use crate::mock::MockLocalFile;
    use mockall::predicate;

    impl MockLocalFile {
        pub fn should_read(&mut self, path: &Path, content: String) {
            self.expect_read()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(move |_| Ok(content.clone()));
        }

        pub fn should_dir_entries(&mut self, path: &Path, content: Vec<PathBuf>) {
            self.expect_dir_entries()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(move |_| Ok(content.clone()));
        }

        pub fn should_not_read_file_not_found(&mut self, path: &Path, error_message: String) {
            self.expect_read()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(move |_| Err(io::Error::new(io::ErrorKind::NotFound, error_message.clone())));
        }
    }
}
