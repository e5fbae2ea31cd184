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

//! Formats a blank [`DataStorage`] as an empty FAT32 volume.

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::{error, info};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromZeros, IntoBytes};

use crate::boot::BootSector;
use crate::consts::{CLUSTER_EOC_VAL, SECTOR_EXP};
use crate::dirent::{DirAttr, RawDirEntry};

/// Parameters accepted by [`format`]. Unset fields take the same defaults
/// most FAT32 formatters use.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Sectors per cluster; must be a power of 2 in `[1, 128]`. `None`
    /// picks 8 (4 KiB clusters at the fixed 512-byte sector size).
    pub sectors_per_cluster: Option<u8>,
    /// Number of FAT copies, 1 or 2. `None` picks 2.
    pub fat_copies: Option<u8>,
    /// Volume label, truncated to 11 characters and upper-cased. `None`
    /// leaves the volume unlabeled (no volume entry is written).
    pub label: Option<String>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            sectors_per_cluster: None,
            fat_copies: None,
            label: None,
        }
    }
}

/// Formats `label` into the fixed 11-byte field shared by `BS_VolLab` and a
/// volume-label directory entry: upper-cased, space-padded, truncated.
fn format_volume_label(label: &str) -> [u8; 11] {
    let mut raw = [0x20u8; 11];
    for (i, b) in label.bytes().take(11).enumerate() {
        raw[i] = b.to_ascii_uppercase();
    }
    raw
}

/// Writes a fresh boot sector, FSInfo sector, FAT(s), and an empty root
/// directory cluster to `data_storage`, sized to fill its current length.
pub fn format(data_storage: &impl DataStorage, options: FormatOptions) -> Result<()> {
    let total_bytes = data_storage.len().map_err(crate::map_ds_err)?;
    let sector_size = 1u64 << SECTOR_EXP;
    let total_sectors = (total_bytes / sector_size) as u32;
    if total_sectors < 256 {
        error!("Volume of {total_sectors} sectors is too small for FAT32");
        return Err(Error::Fs(FsError::Inconsistent));
    }

    let sectors_per_cluster = options.sectors_per_cluster.unwrap_or(8);
    let fat_copies = options.fat_copies.unwrap_or(2);
    let reserved_sectors = 32u32;
    let info_sector = 1u32;

    // Solve for fat_sectors such that reserved + fat_copies*fat_sectors +
    // cluster_count*sectors_per_cluster == total_sectors, with cluster_count
    // = data_sectors / sectors_per_cluster and each FAT entry covering one
    // cluster (4 bytes/entry).
    let entries_per_sector = (sector_size / 4) as u32;
    let mut fat_sectors = 1u32;
    loop {
        let data_sectors = total_sectors
            .saturating_sub(reserved_sectors)
            .saturating_sub(fat_sectors * fat_copies as u32);
        let cluster_count = data_sectors / sectors_per_cluster as u32;
        let needed = cluster_count.div_ceil(entries_per_sector).max(1);
        if needed <= fat_sectors {
            break;
        }
        fat_sectors = needed;
    }

    let mut boot_sector = BootSector::new_zeroed();
    boot_sector.bs_jmpboot = [0xEB, 0x58, 0x90];
    boot_sector.bs_oemname = *b"HYRAXFAT";
    boot_sector.bpb_bytspersec = U16::new(sector_size as u16);
    boot_sector.bpb_secperclus = sectors_per_cluster;
    boot_sector.bpb_rsvdseccnt = U16::new(reserved_sectors as u16);
    boot_sector.bpb_numfats = fat_copies;
    boot_sector.bpb_media = 0xF8;
    boot_sector.bpb_totsec32 = U32::new(total_sectors);
    boot_sector.bpb_fatsz32 = U32::new(fat_sectors);
    boot_sector.bpb_rootclus = U32::new(2);
    boot_sector.bpb_fsinfo = U16::new(info_sector as u16);
    boot_sector.bs_bootsig = 0x29;
    boot_sector.bs_vollab = options
        .label
        .as_deref()
        .map(format_volume_label)
        .unwrap_or(*b"NO NAME    ");
    boot_sector.bs_filsystype = *b"FAT32   ";
    boot_sector.signature_word = [0x55, 0xAA];
    data_storage
        .write(0, boot_sector.as_bytes())
        .map_err(crate::map_ds_err)?;

    let cluster_heap_sector = reserved_sectors + fat_sectors * fat_copies as u32;
    let cluster_count = (total_sectors - cluster_heap_sector) / sectors_per_cluster as u32;

    let mut info = crate::boot::FsInfo::new_zeroed();
    info.fsi_leadsig = U32::new(crate::consts::FSINFO_LEAD_SIGNATURE);
    info.fsi_strucsig = U32::new(crate::consts::FSINFO_STRUCT_SIGNATURE);
    info.fsi_free_count = U32::new(cluster_count - 1);
    info.fsi_nxt_free = U32::new(3);
    info.fsi_trailsig = U32::new(crate::consts::FSINFO_TRAIL_SIGNATURE);
    data_storage
        .write((info_sector as u64) * sector_size, info.as_bytes())
        .map_err(crate::map_ds_err)?;

    let mut fat_zero_sector = vec![0u8; sector_size as usize];
    // Reserved entries: cluster 0 carries the media descriptor, cluster 1 is
    // an end-of-chain marker. Cluster 2 (the root) is itself end-of-chain.
    U32::new(0x0FFF_FFF8).write_to(&mut fat_zero_sector[0..4]).ok();
    U32::new(0x0FFF_FFFF).write_to(&mut fat_zero_sector[4..8]).ok();
    U32::new(CLUSTER_EOC_VAL).write_to(&mut fat_zero_sector[8..12]).ok();
    for copy in 0..fat_copies as u32 {
        let fat_start = (reserved_sectors + copy * fat_sectors) as u64 * sector_size;
        data_storage
            .write(fat_start, &fat_zero_sector)
            .map_err(crate::map_ds_err)?;
        let zeros = vec![0u8; sector_size as usize];
        for sector in 1..fat_sectors as u64 {
            data_storage
                .write(fat_start + sector * sector_size, &zeros)
                .map_err(crate::map_ds_err)?;
        }
    }

    let root_sector = cluster_heap_sector as u64 * sector_size;
    let zeros = vec![0u8; (sectors_per_cluster as u64 * sector_size) as usize];
    data_storage
        .write(root_sector, &zeros)
        .map_err(crate::map_ds_err)?;

    if let Some(label) = &options.label {
        let mut entry = RawDirEntry::new_zeroed();
        entry.dir_name = format_volume_label(label);
        entry.dir_attr = DirAttr::VOLUME.bits();
        let mut buffer = vec![0u8; sector_size as usize];
        buffer[0..32].copy_from_slice(entry.as_bytes());
        data_storage
            .write(root_sector, &buffer)
            .map_err(crate::map_ds_err)?;
    }

    info!(
        "Formatted FAT32 volume: {total_sectors} sectors, {cluster_count} clusters, {fat_sectors} sectors/FAT x{fat_copies}"
    );
    Ok(())
}
