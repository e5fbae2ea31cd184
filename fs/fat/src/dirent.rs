// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Short (8.3) and long (UTF-16LE) directory entry codec.

use bitflags::bitflags;
use hyrax_fs::{Error, FsError, Result};
use log::error;
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

use crate::consts::{
    E_FLAG_EMPTY, E_FLAG_FREE, KANJI_LEAD_ESCAPE, LFN_ENTRY_LENGTH, LFN_LAST, MASK_LFN,
};
use crate::time::DosDateTime;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct DirAttr: u8 {
        const RO = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl DirAttr {
    pub(crate) const LONG_NAME: Self =
        Self::from_bits_truncate(Self::RO.bits() | Self::HIDDEN.bits() | Self::SYSTEM.bits() | Self::VOLUME.bits());

    pub(crate) fn is_long_name(self) -> bool {
        self == Self::LONG_NAME
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromZeros, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct RawDirEntry {
    pub(crate) dir_name: [u8; 11],
    pub(crate) dir_attr: u8,
    pub(crate) dir_ntres: u8,
    pub(crate) dir_crttimetenth: u8,
    pub(crate) dir_crttime: U16,
    pub(crate) dir_crtdate: U16,
    pub(crate) dir_lstaccdate: U16,
    pub(crate) dir_fstclushi: U16,
    pub(crate) dir_wrttime: U16,
    pub(crate) dir_wrtdate: U16,
    pub(crate) dir_fstcluslo: U16,
    pub(crate) dir_filesize: U32,
}

impl RawDirEntry {
    pub(crate) fn first_cluster(&self) -> u32 {
        (self.dir_fstcluslo.get() as u32) | ((self.dir_fstclushi.get() as u32) << 16)
    }

    pub(crate) fn set_first_cluster(&mut self, cluster: u32) {
        self.dir_fstcluslo = U16::new(cluster as u16);
        self.dir_fstclushi = U16::new((cluster >> 16) as u16);
    }

    pub(crate) fn attr(&self) -> DirAttr {
        DirAttr::from_bits_truncate(self.dir_attr)
    }

    pub(crate) fn is_free(&self) -> bool {
        self.dir_name[0] == E_FLAG_FREE
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.dir_name[0] == E_FLAG_EMPTY
    }

    pub(crate) fn set_created(&mut self, stamp: DosDateTime) {
        self.dir_crttime = U16::new(stamp.time);
        self.dir_crtdate = U16::new(stamp.date);
        self.dir_crttimetenth = 0;
        self.dir_wrttime = U16::new(stamp.time);
        self.dir_wrtdate = U16::new(stamp.date);
        self.dir_lstaccdate = U16::new(stamp.date);
    }

    pub(crate) fn set_modified(&mut self, stamp: DosDateTime) {
        self.dir_wrttime = U16::new(stamp.time);
        self.dir_wrtdate = U16::new(stamp.date);
        self.dir_lstaccdate = U16::new(stamp.date);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromZeros, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct RawLfnEntry {
    pub(crate) ldir_ord: u8,
    pub(crate) ldir_name1: [U16; 5],
    pub(crate) ldir_attr: u8,
    pub(crate) ldir_type: u8,
    pub(crate) ldir_chksum: u8,
    pub(crate) ldir_name2: [U16; 6],
    pub(crate) ldir_fstcluslo: U16,
    pub(crate) ldir_name3: [U16; 2],
}

impl RawLfnEntry {
    pub(crate) fn units(&self) -> [u16; LFN_ENTRY_LENGTH] {
        let mut units = [0u16; LFN_ENTRY_LENGTH];
        for (i, u) in self.ldir_name1.iter().enumerate() {
            units[i] = u.get();
        }
        for (i, u) in self.ldir_name2.iter().enumerate() {
            units[5 + i] = u.get();
        }
        for (i, u) in self.ldir_name3.iter().enumerate() {
            units[11 + i] = u.get();
        }
        units
    }

    pub(crate) fn set_units(&mut self, units: &[u16; LFN_ENTRY_LENGTH]) {
        for (i, u) in units[..5].iter().enumerate() {
            self.ldir_name1[i] = U16::new(*u);
        }
        for (i, u) in units[5..11].iter().enumerate() {
            self.ldir_name2[i] = U16::new(*u);
        }
        for (i, u) in units[11..13].iter().enumerate() {
            self.ldir_name3[i] = U16::new(*u);
        }
    }

    pub(crate) fn is_last(&self) -> bool {
        self.ldir_ord & LFN_LAST != 0
    }

    pub(crate) fn ordinal(&self) -> u8 {
        self.ldir_ord & MASK_LFN
    }
}

/// Checksum of an 11-byte short name, bound into every LFN entry so a
/// directory scan can detect an orphaned long-name run.
pub(crate) fn short_name_checksum(short_name: &[u8; 11]) -> u8 {
    short_name.iter().fold(0u8, |sum, &byte| {
        sum.rotate_right(1).wrapping_add(byte)
    })
}

/// Decodes a run of little-endian UTF-16 code units with no surrogate-pair
/// support, matching the original codec (BMP-only, names are truncated
/// rather than corrupted on an unpaired surrogate).
pub(crate) fn utf16_to_utf8(units: impl Iterator<Item = u16>) -> String {
    let mut out = String::new();
    for unit in units {
        if (0xD800..=0xDFFF).contains(&unit) {
            break;
        }
        match char::from_u32(unit as u32) {
            Some(c) => out.push(c),
            None => break,
        }
    }
    out
}

/// Encodes `s` as UTF-16 code units, rejecting any character outside the
/// Basic Multilingual Plane.
pub(crate) fn utf8_to_utf16(s: &str) -> Result<Vec<u16>> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        if cp > 0xFFFF {
            error!("Character {c:?} requires a surrogate pair, which is unsupported");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        out.push(cp as u16);
    }
    Ok(out)
}

/// Applies the FAT kanji lead-byte escape: a short-name byte of 0xE5
/// (which collides with the deleted-entry marker) is stored as 0x05 and
/// restored on read.
pub(crate) fn escape_kanji_lead(byte: u8) -> u8 {
    if byte == E_FLAG_EMPTY {
        KANJI_LEAD_ESCAPE
    } else {
        byte
    }
}

pub(crate) fn unescape_kanji_lead(byte: u8) -> u8 {
    if byte == KANJI_LEAD_ESCAPE {
        E_FLAG_EMPTY
    } else {
        byte
    }
}

/// Parses the on-disk 8.3 short name into its display form (lowercased,
/// trimmed, with a `.` separating base and extension when the extension is
/// non-empty).
pub(crate) fn short_name_to_display(raw: &[u8; 11]) -> String {
    let (base, ext) = raw.split_at(8);
    let mut name = String::new();
    let base0 = unescape_kanji_lead(base[0]);
    for (i, &b) in base.iter().enumerate() {
        if b == 0x20 {
            break;
        }
        let b = if i == 0 { base0 } else { b };
        name.push(b as char);
    }
    let ext_trimmed: Vec<u8> = ext.iter().copied().take_while(|&b| b != 0x20).collect();
    if !ext_trimmed.is_empty() {
        name.push('.');
        for b in ext_trimmed {
            name.push(b as char);
        }
    }
    name.to_ascii_lowercase()
}

/// Characters legal in an 8.3 short name besides alphanumerics.
const SHORT_NAME_PUNCTUATION: &[u8] = b"$%'-_@~`!(){}^#&";

/// True for a byte that may appear in an 8.3 short name, case aside.
pub(crate) fn is_short_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || SHORT_NAME_PUNCTUATION.contains(&b)
}

/// True when `name` can be represented verbatim as an 8.3 short name
/// (single dot, uppercase-equivalent ASCII, no illegal characters, no
/// trailing dot/space).
pub(crate) fn fits_short_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return name == "." || name == "..";
    }
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return false;
    }
    let valid = |s: &str| {
        s.bytes().all(is_short_name_byte) && !s.chars().any(|c| c.is_ascii_lowercase())
    };
    valid(base) && valid(ext)
}

/// Formats `name` (already verified by [`fits_short_name`], or one of the
/// synthesized "NAME~1" candidates) into the on-disk 11-byte field.
pub(crate) fn format_short_name(name: &str) -> [u8; 11] {
    let mut raw = [0x20u8; 11];
    if name == "." {
        raw[0] = b'.';
        return raw;
    }
    if name == ".." {
        raw[0] = b'.';
        raw[1] = b'.';
        return raw;
    }
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    for (i, b) in base.bytes().take(8).enumerate() {
        raw[i] = escape_kanji_lead(b.to_ascii_uppercase());
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        raw[8 + i] = b.to_ascii_uppercase();
    }
    raw
}

/// Synthesizes a unique `basis~n.ext` short name for a long name that
/// doesn't fit 8.3, per the numeric-tail algorithm.
pub(crate) fn synthesize_short_name(
    name: &str,
    mut exists: impl FnMut(&[u8; 11]) -> bool,
) -> Result<[u8; 11]> {
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    let base_upper: String = base
        .chars()
        .filter(|c| c.is_ascii() && is_short_name_byte(*c as u8))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let ext_upper: String = ext
        .chars()
        .filter(|c| c.is_ascii() && is_short_name_byte(*c as u8))
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let base_upper = if base_upper.is_empty() {
        "FILE".to_string()
    } else {
        base_upper
    };

    for n in 1..=crate::consts::MAX_SIMILAR_NAMES {
        let suffix = format!("~{n}");
        let base_len = (8 - suffix.len()).min(base_upper.chars().count());
        let truncated: String = base_upper.chars().take(base_len).collect();
        let candidate_name = format!("{truncated}{suffix}");
        let mut raw = [0x20u8; 11];
        for (i, b) in candidate_name.bytes().enumerate() {
            raw[i] = b;
        }
        for (i, b) in ext_upper.bytes().enumerate() {
            raw[8 + i] = b;
        }
        if !exists(&raw) {
            return Ok(raw);
        }
    }
    error!("Exhausted numeric-tail candidates for {name:?}");
    Err(Error::Fs(FsError::Exist))
}
