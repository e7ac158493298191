pub mod library;

pub use library::{check_source, scan_library, LibraryScan};
