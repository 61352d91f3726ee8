#![allow(clippy::too_many_arguments)]
// We are writing a very specific, well defined format, so it makes it easier to
// see exactly what is being written if we explicitly write out `\n` instead of
// hoping somebody notices the `writeln!` instead of `write!`.
#![allow(clippy::write_with_newline)]

//! Reading and writing of `ar` archives of object files: the BSD, 4.4BSD
//! and SVR4/COFF dialects of the classic format, and AIX small and big
//! archives.

mod alignment;
mod archive;
mod archive_reader;
mod archive_writer;
mod cache;
mod error;
mod header;
mod name_table;
mod object_reader;
mod symbol_map;
mod xcoff;

pub use archive::ArchiveKind;
pub use archive_reader::{Archive, Members, ReadOptions};
pub use archive_writer::{
    write_archive_to_file, write_archive_to_stream, ArchiveOutput, NewArchiveMember, WriteOptions,
};
pub use cache::{Member, MemberId};
pub use error::{Error, Result};
pub use header::MemberHeader;
pub use name_table::{normalize, ExtendedNameTable, HostPathStyle};
pub use symbol_map::{ArchiveSymbol, SymbolMap};

pub type GetSymbolsFn =
    fn(buf: &[u8], f: &mut dyn FnMut(&[u8]) -> std::io::Result<()>) -> std::io::Result<bool>;
pub type Is64BitObjectFileFn = fn(buf: &[u8]) -> bool;

/// Helper struct to query object file information from members.
pub struct ObjectReader {
    /// Iterates over the symbols in the object file. Returns false if the
    /// buffer is not a recognized object file.
    pub get_symbols: GetSymbolsFn,
    /// Returns true if the object file is 64-bit. Only used to split the
    /// symbol tables of AIX big archives.
    pub is_64_bit_object_file: Is64BitObjectFileFn,
}

/// Default implementation of [ObjectReader] that uses the `object` crate.
pub const DEFAULT_OBJECT_READER: ObjectReader = ObjectReader {
    get_symbols: object_reader::get_native_object_symbols,
    is_64_bit_object_file: object_reader::is_64_bit_symbolic_file,
};
