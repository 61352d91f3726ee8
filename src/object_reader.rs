// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Default implementation of [crate::ObjectReader] that uses the `object` crate.

use std::io;

use object::{Object, ObjectSymbol};

/// Whether a symbol belongs in the archive symbol map: global, defined, and
/// not a file or section marker.
fn is_archive_symbol(sym: &object::read::Symbol<'_, '_>) -> bool {
    if sym.kind() == object::SymbolKind::File || sym.kind() == object::SymbolKind::Section {
        return false;
    }
    if !sym.is_global() {
        return false;
    }
    if sym.is_undefined() {
        return false;
    }
    true
}

/// Feeds the archive-visible symbols of `buf` to `f`. Returns `false` when
/// `buf` is not a recognized object file, in which case it contributes no
/// symbols and does not on its own call for a symbol map.
pub fn get_native_object_symbols(
    buf: &[u8],
    f: &mut dyn FnMut(&[u8]) -> io::Result<()>,
) -> io::Result<bool> {
    let Ok(file) = object::File::parse(buf) else {
        return Ok(false);
    };
    for sym in file.symbols() {
        if !is_archive_symbol(&sym) {
            continue;
        }
        let name = sym
            .name_bytes()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        f(name)?;
    }
    Ok(true)
}

/// Only XCOFF big archives care: their 64-bit members get a symbol table of
/// their own. Anything unrecognized is treated as 32-bit.
pub fn is_64_bit_symbolic_file(obj: &[u8]) -> bool {
    object::FileKind::parse(obj).is_ok_and(|kind| {
        matches!(
            kind,
            object::FileKind::Elf64
                | object::FileKind::MachO64
                | object::FileKind::Pe64
                | object::FileKind::Xcoff64
                | object::FileKind::MachOFat64
        )
    })
}
