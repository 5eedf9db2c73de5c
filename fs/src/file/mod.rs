pub mod deleter;
pub mod reader;
pub mod renamer;
pub mod writer;

pub use deleter::FileDeleter;
pub use reader::FileReader;
pub use renamer::FileRenamer;
pub use writer::FileWriter;
