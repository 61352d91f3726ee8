// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use crate::header::{ArHeaderCodec, HeaderCodec, XcoffHeaderCodec};
use crate::name_table::NameDialect;

pub(crate) const ARMAG: &[u8; 8] = b"!<arch>\n";
/// The big-endian b.out flavour of the ar magic.
pub(crate) const ARMAGB: &[u8; 8] = b"!<bout>\n";
pub(crate) const THIN_MAGIC: &[u8; 8] = b"!<thin>\n";
pub(crate) const MAGIC_LEN: u64 = 8;

/// Trailer of every member header.
pub(crate) const ARFMAG: &[u8; 2] = b"`\n";

pub(crate) const AR_HDR_SIZE: u64 = 60;
pub(crate) const AR_NAME_LEN: usize = 16;
pub(crate) const AR_DATE_OFFSET: u64 = 16;
pub(crate) const AR_SIZE_RANGE: std::ops::Range<usize> = 48..58;

/// Size field is 10 decimal digits long
pub(crate) const MAX_MEMBER_SIZE: u64 = 9999999999;

pub(crate) const BSD_SYMDEF_NAME: &str = "__.SYMDEF";
pub(crate) const BSD_SYMDEF_SORTED_NAME: &str = "__.SYMDEF SORTED";
pub(crate) const BSD_SYMDEF_64_NAME: &str = "__.SYMDEF_64";
pub(crate) const SYM64_NAME: &[u8; 16] = b"/SYM64/         ";
/// Name field of the COFF symbol map and of the PE second linker member.
pub(crate) const COFF_SYMDEF_FIELD: &[u8; 16] = b"/               ";

pub(crate) const SVR4_NAME_TABLE_NAME: &str = "//";
pub(crate) const BSD_NAME_TABLE_NAME: &str = "ARFILENAMES/";

/// The Berkeley linker refuses a symbol map whose timestamp is more than
/// this many seconds older than the archive's modification time.
pub(crate) const ARMAP_TIME_OFFSET: u64 = 60;

static XCOFF_SMALL_HEADER: XcoffHeaderCodec = XcoffHeaderCodec(&xcoff::SMALL);
static XCOFF_BIG_HEADER: XcoffHeaderCodec = XcoffHeaderCodec(&xcoff::BIG);

/// The binary dialect of an archive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// Traditional BSD: `__.SYMDEF` symbol map, `ARFILENAMES/` name table
    /// referenced with a leading space.
    Bsd,
    /// 4.4BSD: `__.SYMDEF` symbol map, long names stored inline after the
    /// header with `#1/<len>`.
    Bsd44,
    /// System V / GNU / COFF: `/` symbol map with big-endian offsets, `//`
    /// name table referenced with a leading slash.
    Coff,
    /// AIX small archive (`<aiaff>`).
    XcoffSmall,
    /// AIX big archive (`<bigaf>`).
    XcoffBig,
}

impl ArchiveKind {
    pub(crate) fn is_bsd_like(self) -> bool {
        matches!(self, ArchiveKind::Bsd | ArchiveKind::Bsd44)
    }

    pub(crate) fn header_codec(self) -> &'static dyn HeaderCodec {
        match self {
            ArchiveKind::Bsd | ArchiveKind::Bsd44 | ArchiveKind::Coff => &ArHeaderCodec,
            ArchiveKind::XcoffSmall => &XCOFF_SMALL_HEADER,
            ArchiveKind::XcoffBig => &XCOFF_BIG_HEADER,
        }
    }

    /// The name-table dialect, or `None` when long names are not stored in
    /// a shared table.
    pub(crate) fn name_dialect(self) -> Option<NameDialect> {
        match self {
            ArchiveKind::Bsd => Some(NameDialect::Bsd),
            ArchiveKind::Coff => Some(NameDialect::Svr4),
            ArchiveKind::Bsd44 | ArchiveKind::XcoffSmall | ArchiveKind::XcoffBig => None,
        }
    }

    pub(crate) fn xcoff_layout(self) -> Option<&'static xcoff::Layout> {
        match self {
            ArchiveKind::XcoffSmall => Some(&xcoff::SMALL),
            ArchiveKind::XcoffBig => Some(&xcoff::BIG),
            _ => None,
        }
    }
}

pub(crate) mod xcoff {
    pub(crate) const SMALL_MAGIC: &[u8; 8] = b"<aiaff>\n";
    pub(crate) const BIG_MAGIC: &[u8; 8] = b"<bigaf>\n";

    /// Field widths of one XCOFF container flavour.
    ///
    /// Fixed-length file header: magic, then offsets to the member table,
    /// the global symbol table, (big only) the 64-bit global symbol table,
    /// the first member, the last member and the free list.
    ///
    /// Member header: size, next member, previous member (offset width
    /// each), then date, uid, gid, mode (12 each) and a 4-byte name length,
    /// followed by the name padded to even length and "`\n".
    #[derive(Debug, PartialEq, Eq)]
    pub(crate) struct Layout {
        pub(crate) magic: &'static [u8; 8],
        pub(crate) offset_width: usize,
        pub(crate) has_sym64: bool,
        /// Width of each binary count/offset in the global symbol table.
        pub(crate) symbol_offset_size: u64,
    }

    pub(crate) const SMALL: Layout = Layout {
        magic: SMALL_MAGIC,
        offset_width: 12,
        has_sym64: false,
        symbol_offset_size: 4,
    };

    pub(crate) const BIG: Layout = Layout {
        magic: BIG_MAGIC,
        offset_width: 20,
        has_sym64: true,
        symbol_offset_size: 8,
    };

    pub(crate) const FIELD_WIDTH: usize = 12;
    pub(crate) const NAME_LEN_WIDTH: usize = 4;
    /// Longest name the 4-digit name length field can describe.
    pub(crate) const MAX_NAME_LEN: u64 = 9999;

    impl Layout {
        pub(crate) fn file_header_size(&self) -> u64 {
            let offsets = if self.has_sym64 { 6 } else { 5 };
            (self.magic.len() + offsets * self.offset_width) as u64
        }

        /// Size of a member header without the name and trailer.
        pub(crate) fn member_header_size(&self) -> u64 {
            (3 * self.offset_width + 4 * FIELD_WIDTH + NAME_LEN_WIDTH) as u64
        }
    }
}
