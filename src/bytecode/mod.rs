// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Bytecode container (`.cpbc`): a versioned header, the string heap and a
//! tree of segments describing namespaces, types, members and method code.

pub mod codec;
pub mod listing;
pub mod reader;
pub mod writer;

pub use codec::CodecError;
pub use listing::ListingWriter;
pub use reader::{read_container, read_outline, ContainerOutline, OutlineMethod, OutlineType};
pub use writer::{write_container, ContainerImage};

pub const FORMAT_VERSION: u16 = 0x0001;

/// Header flag: local and label names live in the debug database.
pub const FLAG_NAMES_STRIPPED: u8 = 0x01;

pub const SEG_NAMESPACE: u8 = 1;
pub const SEG_TYPE: u8 = 2;
pub const SEG_FIELD: u8 = 3;
pub const SEG_METHOD: u8 = 4;
pub const SEG_ALIAS: u8 = 5;
pub const SEG_EXTERN: u8 = 6;
pub const SEG_VARIABLE: u8 = 7;

/// Name synthesised for a local whose name was stripped.
pub fn fallback_local_name(slot: u16) -> String {
    format!("loc{slot}")
}

/// Name synthesised for a label whose name was stripped.
pub fn fallback_label_name(byte_offset: u32) -> String {
    format!("lbl_{byte_offset:04X}")
}
