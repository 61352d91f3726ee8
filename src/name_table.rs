// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Long file names that do not fit the 16-byte header field.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use log::debug;

use crate::alignment::align_even;
use crate::archive::*;
use crate::error::{Error, Result};
use crate::header::{parse_decimal, read_block, read_up_to, ArHeaderCodec, HeaderCodec};

/// How long names are stored and referenced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NameDialect {
    /// `//` table, entries terminated by "/\n", referenced as `/<offset>`.
    Svr4,
    /// `ARFILENAMES/` table, entries terminated by "\n", referenced as
    /// ` <offset>`.
    Bsd,
}

impl NameDialect {
    pub(crate) fn table_name(self) -> &'static str {
        match self {
            NameDialect::Svr4 => SVR4_NAME_TABLE_NAME,
            NameDialect::Bsd => BSD_NAME_TABLE_NAME,
        }
    }

    fn sentinel(self) -> char {
        match self {
            NameDialect::Svr4 => '/',
            NameDialect::Bsd => ' ',
        }
    }

    fn terminator(self) -> &'static [u8] {
        match self {
            NameDialect::Svr4 => b"/\n",
            NameDialect::Bsd => b"\n",
        }
    }

    /// The longest name that can stay in the header. SVR4 reserves one byte
    /// for the trailing slash.
    pub(crate) fn max_embedded_len(self) -> usize {
        match self {
            NameDialect::Svr4 => AR_NAME_LEN - 1,
            NameDialect::Bsd => AR_NAME_LEN,
        }
    }

    /// BSD embedded names end at the first space, so names containing one
    /// must go to the table.
    pub(crate) fn fits(self, name: &str) -> bool {
        name.len() <= self.max_embedded_len() && !(self == NameDialect::Bsd && name.contains(' '))
    }

    pub(crate) fn embedded_field(self, name: &str) -> String {
        match self {
            NameDialect::Svr4 => format!("{}/", name),
            NameDialect::Bsd => name.to_string(),
        }
    }

    pub(crate) fn external_field(self, offset: u64) -> String {
        format!("{}{}", self.sentinel(), offset)
    }
}

/// Path rules used to reduce a member's path to the name stored in the
/// archive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostPathStyle {
    /// Directories separated by `/`.
    Unix,
    /// `/` or `\` separators and an optional drive letter.
    Dos,
    /// Directory part delimited by `:`, `]` or `>`.
    Vms,
}

impl HostPathStyle {
    pub fn native() -> HostPathStyle {
        if cfg!(windows) {
            HostPathStyle::Dos
        } else {
            HostPathStyle::Unix
        }
    }
}

impl Default for HostPathStyle {
    fn default() -> Self {
        HostPathStyle::native()
    }
}

/// Strips the directory part of `path` according to `style`.
pub fn normalize(path: &str, style: HostPathStyle) -> &str {
    let mut start = path.rfind('/').map_or(0, |i| i + 1);
    match style {
        HostPathStyle::Unix => {}
        HostPathStyle::Dos => {
            if let Some(i) = path.rfind('\\') {
                start = start.max(i + 1);
            }
            let bytes = path.as_bytes();
            if start == 0 && bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
            {
                start = 2;
            }
        }
        HostPathStyle::Vms => {
            if let Some(i) = path.rfind(|c| matches!(c, ':' | ']' | '>')) {
                start = start.max(i + 1);
            }
        }
    }
    &path[start..]
}

/// The contents of the name table member, with every entry NUL-terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedNameTable {
    names: Vec<u8>,
}

impl ExtendedNameTable {
    /// Entries on disk are newline-terminated so the archive stays printable,
    /// with an extra `/` before the newline in SVR4 archives. DOS tools may
    /// have written `\` separators.
    pub(crate) fn from_raw(mut names: Vec<u8>) -> ExtendedNameTable {
        for i in 0..names.len() {
            match names[i] {
                b'\n' => {
                    if i > 0 && names[i - 1] == b'/' {
                        names[i - 1] = 0;
                    }
                    names[i] = 0;
                }
                b'\\' => names[i] = b'/',
                _ => {}
            }
        }
        ExtendedNameTable { names }
    }

    /// Resolves the decimal offset that follows the sentinel in a header's
    /// name field.
    pub(crate) fn resolve(&self, index_field: &[u8]) -> Result<String> {
        let index = parse_decimal("name table index", index_field)?;
        if index >= self.names.len() as u64 {
            return Err(Error::malformed(format!(
                "name table index {} out of range ({} bytes)",
                index,
                self.names.len()
            )));
        }
        let tail = &self.names[index as usize..];
        let end = tail.iter().position(|&c| c == 0).unwrap_or(tail.len());
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A name table found while indexing an archive.
#[derive(Debug)]
pub(crate) struct LoadedNameTable {
    pub(crate) table: ExtendedNameTable,
    pub(crate) dialect: NameDialect,
    /// Offset of the member following the table.
    pub(crate) next_offset: u64,
}

/// Reads the name table member if one starts at `offset`. Nothing is
/// consumed when the member there is not a name table.
pub(crate) fn load<R: Read + Seek>(r: &mut R, offset: u64) -> Result<Option<LoadedNameTable>> {
    r.seek(SeekFrom::Start(offset))?;
    let mut next_name = [0; AR_NAME_LEN];
    if read_block(r, &mut next_name)? < next_name.len() {
        return Ok(None);
    }
    let Some(dialect) = [NameDialect::Svr4, NameDialect::Bsd]
        .into_iter()
        .find(|d| format!("{:<16}", d.table_name()).as_bytes() == next_name)
    else {
        return Ok(None);
    };

    r.seek(SeekFrom::Start(offset))?;
    let header = ArHeaderCodec
        .decode(r, None)?
        .ok_or(Error::NoMoreArchivedFiles)?;
    let names = read_up_to(r, header.size())?;
    if (names.len() as u64) < header.size() {
        return Err(Error::malformed(format!(
            "extended name table is truncated ({} of {} bytes)",
            names.len(),
            header.size()
        )));
    }
    debug!(
        "loaded extended name table {:?} ({} bytes)",
        header.name(),
        names.len()
    );
    Ok(Some(LoadedNameTable {
        table: ExtendedNameTable::from_raw(names),
        dialect,
        next_offset: align_even(offset + header.header_len() + header.size()),
    }))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NameField {
    Embedded,
    External(u64),
}

/// The name table to emit, and where each member's name ends up.
#[derive(Debug)]
pub(crate) struct NameTablePlan {
    pub(crate) names: Vec<u8>,
    pub(crate) table_name: &'static str,
    pub(crate) fields: Vec<NameField>,
}

/// Decides which names move to the table. Identical long names share one
/// entry. An empty `names` blob means no table member is written.
pub(crate) fn construct(member_names: &[&str], dialect: NameDialect) -> NameTablePlan {
    let mut names = Vec::new();
    let mut offsets = HashMap::<&str, u64>::new();
    let fields = member_names
        .iter()
        .map(|&name| {
            if dialect.fits(name) {
                return NameField::Embedded;
            }
            let offset = *offsets.entry(name).or_insert_with(|| {
                let pos = names.len() as u64;
                names.extend_from_slice(name.as_bytes());
                names.extend_from_slice(dialect.terminator());
                pos
            });
            NameField::External(offset)
        })
        .collect();
    NameTablePlan {
        names,
        table_name: dialect.table_name(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_per_host_style() {
        assert_eq!(normalize("dir/sub/a.o", HostPathStyle::Unix), "a.o");
        assert_eq!(normalize("dir\\a.o", HostPathStyle::Unix), "dir\\a.o");
        assert_eq!(normalize("dir\\a.o", HostPathStyle::Dos), "a.o");
        assert_eq!(normalize("c:a.o", HostPathStyle::Dos), "a.o");
        assert_eq!(normalize("c:\\x/y\\a.o", HostPathStyle::Dos), "a.o");
        assert_eq!(normalize("dka0:[dir.sub]a.obj", HostPathStyle::Vms), "a.obj");
        assert_eq!(normalize("plain.o", HostPathStyle::Vms), "plain.o");
    }

    #[test]
    fn strips_terminators_and_backslashes() {
        let table = ExtendedNameTable::from_raw(b"a_long_name.o/\ndir\\b.o\n".to_vec());
        assert_eq!(table.resolve(b"0 ").unwrap(), "a_long_name.o");
        assert_eq!(table.resolve(b"15").unwrap(), "dir/b.o");
        assert!(table.resolve(b"40").unwrap_err().is_malformed());
        assert!(table.resolve(b"x1").unwrap_err().is_malformed());
    }

    #[test]
    fn externalizes_only_names_past_the_field_width() {
        let fifteen = "fifteen_chars.o";
        let long_name = "seventeen_char.o_";
        let plan = construct(&[fifteen, long_name, long_name], NameDialect::Svr4);
        assert_eq!(
            plan.fields,
            vec![
                NameField::Embedded,
                NameField::External(0),
                NameField::External(0)
            ]
        );
        assert_eq!(plan.names, b"seventeen_char.o_/\n");
        assert_eq!(plan.table_name, "//");

        let plan = construct(&["exactly16chars.o", "a b.o"], NameDialect::Bsd);
        assert_eq!(plan.fields, vec![NameField::Embedded, NameField::External(0)]);
        assert_eq!(plan.names, b"a b.o\n");
        assert_eq!(NameDialect::Bsd.external_field(0), " 0");
    }
}
