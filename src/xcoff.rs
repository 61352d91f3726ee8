// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! AIX archives. Members form a doubly linked chain through their headers,
//! and the member table and global symbol tables are members without names,
//! located through the fixed-length file header.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::alignment::align_even;
use crate::archive::xcoff::Layout;
use crate::archive::MAGIC_LEN;
use crate::archive_writer::PreparedMember;
use crate::error::{Error, Result};
use crate::header::{parse_decimal, print_xcoff_member_header, read_block, MemberHeader};
use crate::header::{HeaderCodec, XcoffHeaderCodec};
use crate::symbol_map::{ArmapEntry, SymbolMap, SymbolMapCodec, XcoffSymbolMap};

/// The fixed-length header following the magic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub(crate) layout: &'static Layout,
    pub(crate) member_table_offset: u64,
    pub(crate) symbol_table_offset: u64,
    /// Big archives only.
    pub(crate) symbol_table64_offset: u64,
    pub(crate) first_member_offset: u64,
    pub(crate) last_member_offset: u64,
    pub(crate) free_list_offset: u64,
}

impl FileHeader {
    /// Reads the header that follows the magic.
    pub(crate) fn read(r: &mut dyn Read, layout: &'static Layout) -> Result<FileHeader> {
        let len = (layout.file_header_size() - MAGIC_LEN) as usize;
        let mut raw = vec![0; len];
        if read_block(r, &mut raw)? < len {
            return Err(Error::malformed("XCOFF file header is truncated"));
        }
        let mut fields = raw.chunks(layout.offset_width);
        let mut next = |name: &str| -> Result<u64> {
            let field = fields.next().unwrap_or_default();
            parse_decimal(name, field)
        };
        let member_table_offset = next("member table offset")?;
        let symbol_table_offset = next("global symbol table offset")?;
        let symbol_table64_offset = if layout.has_sym64 {
            next("64-bit global symbol table offset")?
        } else {
            0
        };
        Ok(FileHeader {
            layout,
            member_table_offset,
            symbol_table_offset,
            symbol_table64_offset,
            first_member_offset: next("first member offset")?,
            last_member_offset: next("last member offset")?,
            free_list_offset: next("free list offset")?,
        })
    }

    /// Writes the magic and the fixed-length header.
    pub(crate) fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let width = self.layout.offset_width;
        w.write_all(self.layout.magic)?;
        write!(w, "{:<width$}", self.member_table_offset)?;
        write!(w, "{:<width$}", self.symbol_table_offset)?;
        if self.layout.has_sym64 {
            write!(w, "{:<width$}", self.symbol_table64_offset)?;
        }
        write!(w, "{:<width$}", self.first_member_offset)?;
        write!(w, "{:<width$}", self.last_member_offset)?;
        write!(w, "{:<width$}", self.free_list_offset)
    }

    /// Follows the chain from the member at `offset`. The chain ends at the
    /// last member, at a zero link, or at a link into the member table or a
    /// symbol table. A link that points backwards is malformed.
    pub(crate) fn next_member_offset(
        &self,
        offset: u64,
        header: &MemberHeader,
    ) -> Result<Option<u64>> {
        if offset == self.last_member_offset {
            return Ok(None);
        }
        let next = header.next_offset();
        if next == 0
            || next == self.member_table_offset
            || next == self.symbol_table_offset
            || next == self.symbol_table64_offset
        {
            return Ok(None);
        }
        // Members are laid out in chain order, so a link that does not move
        // forward would revisit a member and never end.
        if next <= offset {
            return Err(Error::malformed(format!(
                "member at offset {} links back to offset {}",
                offset, next
            )));
        }
        Ok(Some(next))
    }
}

/// Reads one global symbol table member.
pub(crate) fn read_symbol_table<R: Read + Seek>(
    r: &mut R,
    layout: &'static Layout,
    offset: u64,
) -> Result<SymbolMap> {
    r.seek(SeekFrom::Start(offset))?;
    let header = XcoffHeaderCodec(layout)
        .decode(r, None)?
        .ok_or_else(|| Error::malformed("global symbol table offset past end of archive"))?;
    let mut payload = Vec::new();
    r.take(header.size()).read_to_end(&mut payload)?;
    if (payload.len() as u64) < header.size() {
        return Err(Error::malformed("global symbol table is truncated"));
    }
    XcoffSymbolMap {
        offset_size: layout.symbol_offset_size,
    }
    .decode(&payload)
}

fn member_header_len(layout: &Layout, name: &str) -> u64 {
    layout.member_header_size() + align_even(name.len() as u64) + 2
}

struct SymbolTable {
    entries: Vec<ArmapEntry>,
    names: Vec<u8>,
}

impl SymbolTable {
    fn new() -> SymbolTable {
        SymbolTable {
            entries: Vec::new(),
            names: Vec::new(),
        }
    }

    fn member_size(&self, codec: &XcoffSymbolMap) -> u64 {
        codec
            .payload_size(self.entries.len() as u64, self.names.len() as u64)
            .0
    }
}

/// Writes an AIX archive: fixed header, chained members, member table, then
/// the global symbol table(s). Small archives have a single symbol table;
/// big archives keep 32-bit and 64-bit members' symbols apart.
pub(crate) fn write_archive<W: Write>(
    w: &mut W,
    layout: &'static Layout,
    members: &[PreparedMember<'_>],
    symbol_names: &[u8],
    symbol_table_mtime: u64,
) -> Result<()> {
    // Chain layout.
    let mut member_offsets = Vec::with_capacity(members.len());
    let mut pos = layout.file_header_size();
    for m in members {
        member_offsets.push(pos);
        pos += member_header_len(layout, &m.name) + align_even(m.size);
    }
    let members_end = pos;
    let last_member_offset = member_offsets.last().copied().unwrap_or(0);

    let mut table32 = SymbolTable::new();
    let mut table64 = SymbolTable::new();
    for (m, &member_offset) in members.iter().zip(&member_offsets) {
        let table = if layout.has_sym64 && m.is_64_bit {
            &mut table64
        } else {
            &mut table32
        };
        for &string_offset in &m.symbols {
            let name = &symbol_names[string_offset as usize..];
            let len = name.iter().position(|&c| c == 0).unwrap_or(name.len());
            table.entries.push(ArmapEntry {
                string_offset: table.names.len() as u64,
                member_offset,
            });
            table.names.extend_from_slice(&name[..len]);
            table.names.push(0);
        }
    }

    let width = layout.offset_width;
    let member_table_names: usize = members.iter().map(|m| m.name.len() + 1).sum();
    let member_table_size = (width * (members.len() + 1) + member_table_names) as u64;
    let member_table_offset = if members.is_empty() { 0 } else { members_end };
    let member_table_end = members_end + align_even(member_header_len(layout, "") + member_table_size);

    let codec = XcoffSymbolMap {
        offset_size: layout.symbol_offset_size,
    };
    let symbol_table_offset = if table32.entries.is_empty() {
        0
    } else {
        member_table_end
    };
    let symbol_table64_offset = match (table64.entries.is_empty(), symbol_table_offset) {
        (true, _) => 0,
        (false, 0) => member_table_end,
        (false, offset) => {
            offset + member_header_len(layout, "") + align_even(table32.member_size(&codec))
        }
    };

    FileHeader {
        layout,
        member_table_offset,
        symbol_table_offset,
        symbol_table64_offset,
        first_member_offset: member_offsets.first().copied().unwrap_or(0),
        last_member_offset,
        free_list_offset: 0,
    }
    .write(w)?;

    for (i, m) in members.iter().enumerate() {
        let prev_offset = if i == 0 { 0 } else { member_offsets[i - 1] };
        let next_offset = member_offsets.get(i + 1).copied().unwrap_or(members_end);
        print_xcoff_member_header(
            w, layout, &m.name, m.mtime, m.uid, m.gid, m.perms, m.size, prev_offset, next_offset,
        )?;
        m.copy_payload(w)?;
        if m.size % 2 != 0 {
            w.write_all(&[0])?;
        }
    }

    if members.is_empty() {
        return Ok(());
    }

    print_xcoff_member_header(
        w,
        layout,
        "",
        0,
        0,
        0,
        0,
        member_table_size,
        last_member_offset,
        if symbol_table_offset != 0 {
            symbol_table_offset
        } else {
            symbol_table64_offset
        },
    )?;
    write!(w, "{:<width$}", members.len())?;
    for offset in &member_offsets {
        write!(w, "{:<width$}", offset)?;
    }
    for m in members {
        w.write_all(m.name.as_bytes())?;
        w.write_all(&[0])?;
    }
    if member_table_size % 2 != 0 {
        w.write_all(&[0])?;
    }

    if symbol_table_offset != 0 {
        print_xcoff_member_header(
            w,
            layout,
            "",
            symbol_table_mtime,
            0,
            0,
            0,
            table32.member_size(&codec),
            member_table_offset,
            symbol_table64_offset,
        )?;
        codec.encode(w, &table32.entries, &table32.names)?;
        // Padding goes between the tables only.
        if symbol_table64_offset != 0 && table32.member_size(&codec) % 2 != 0 {
            w.write_all(&[0])?;
        }
    }

    if symbol_table64_offset != 0 {
        print_xcoff_member_header(
            w,
            layout,
            "",
            symbol_table_mtime,
            0,
            0,
            0,
            table64.member_size(&codec),
            if symbol_table_offset != 0 {
                symbol_table_offset
            } else {
                member_table_offset
            },
            0,
        )?;
        codec.encode(w, &table64.entries, &table64.names)?;
    }
    Ok(())
}
