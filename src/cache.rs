// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::collections::HashMap;

use crate::header::MemberHeader;

/// Handle to a member parsed from an [`crate::Archive`]. Two handles are
/// equal exactly when they name the member at the same header offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(usize);

/// A member of an open archive.
#[derive(Clone, Debug)]
pub struct Member {
    header_offset: u64,
    origin: u64,
    header: MemberHeader,
}

impl Member {
    /// Offset of the member's header. Symbol map entries point here.
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Offset of the first payload byte, just past the header (and any
    /// inline name).
    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn header(&self) -> &MemberHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        self.header.name()
    }

    pub fn size(&self) -> u64 {
        self.header.size()
    }
}

/// Members parsed so far, keyed by header offset. Append-only for the
/// lifetime of the archive.
#[derive(Debug, Default)]
pub(crate) struct MemberCache {
    by_offset: HashMap<u64, MemberId>,
    members: Vec<Member>,
}

impl MemberCache {
    pub(crate) fn lookup(&self, header_offset: u64) -> Option<MemberId> {
        self.by_offset.get(&header_offset).copied()
    }

    /// Records a freshly decoded header. An offset already present keeps its
    /// original entry.
    pub(crate) fn insert(&mut self, header_offset: u64, header: MemberHeader) -> MemberId {
        if let Some(id) = self.lookup(header_offset) {
            return id;
        }
        let id = MemberId(self.members.len());
        self.members.push(Member {
            header_offset,
            origin: header_offset + header.header_len(),
            header,
        });
        self.by_offset.insert(header_offset, id);
        id
    }

    pub(crate) fn get(&self, id: MemberId) -> &Member {
        &self.members[id.0]
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }
}
