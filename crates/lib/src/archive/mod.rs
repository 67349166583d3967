//! The mapfs archive: building containers and patching them into host images.

pub mod builder;
pub mod compress;
pub mod format;
pub mod parser;
pub mod patcher;
pub mod symbols;
pub mod types;

pub use builder::ArchiveBuilder;
pub use compress::{CompressError, Compressor, Yay0};
pub use format::TocEntry;
pub use parser::parse_chain;
pub use patcher::{PatchAction, PatchError, PatchOutcome, apply_archive, patch_rom_file};
pub use symbols::{SymbolError, read_archive_rom_start, read_symbol_address};
pub use types::{ArchiveEntry, ArchiveError, ArchiveNode, ParseError};
