// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

/// Returns a multiple of `align` needed to store `size` bytes.
pub(crate) fn align_to(size: u64, align: u64) -> u64 {
    (size + align - 1) & !(align - 1)
}

pub(crate) fn offset_to_alignment(value: u64, alignment: u64) -> u64 {
    align_to(value, alignment) - value
}

/// Members, name tables and symbol maps all start on an even offset.
pub(crate) fn align_even(value: u64) -> u64 {
    align_to(value, 2)
}
