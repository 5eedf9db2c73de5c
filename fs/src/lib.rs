pub mod directory_manager;
pub mod file;
pub mod utils;
#[cfg(target_family = "windows")]
pub mod win_permissions;

/// Handle to the local filesystem. Every trait in this crate is implemented for it;
/// callers depend on the traits rather than on this type directly so tests can swap
/// in a mock.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFile;

#[cfg(feature = "mocks")]
pub mod mock {
    use std::io;
    use std::path::{Path, PathBuf};

    use super::file::deleter::FileDeleter;
    use super::file::reader::FileReader;
    use super::file::renamer::FileRenamer;
    use super::file::writer::{FileWriter, WriteError};
    use mockall::mock;

    mock! {
        pub LocalFile {}

        impl FileReader for LocalFile {
            fn read(&self, file_path: &Path) -> io::Result<String>;
            fn dir_entries(&self, dir_path: &Path) -> io::Result<Vec<PathBuf>>;
        }

        impl FileRenamer for LocalFile {
            fn rename(&self, file_path: &Path, rename_path: &Path) -> io::Result<()>;
        }

        impl FileWriter for LocalFile {
            fn write(&self, path: &Path, buf: String) -> Result<(), WriteError>;
        }

        impl FileDeleter for LocalFile {
            fn delete(&self, file_path: &Path) -> io::Result<()>;
        }
    }
}
