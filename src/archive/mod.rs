pub mod format;
pub mod mapped;
pub mod writer;

pub use format::{Archive, ArchiveEntry, ArchiveHeader, ArchiveManifest, ArchivedLoader, ExcludedClass, ARCHIVE_VERSION};
pub use mapped::MappedArchive;
pub use writer::{ArchiveWriter, DumpConfig};
