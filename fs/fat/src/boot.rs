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

//! Boot sector and FSInfo parsing, and the immutable volume geometry derived
//! from them.

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::error;
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

use crate::consts::{
    FSINFO_LEAD_SIGNATURE, FSINFO_STRUCT_SIGNATURE, FSINFO_TRAIL_SIGNATURE, SECTOR_EXP,
};

#[repr(C)]
#[derive(Debug, FromZeros, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct BootSector {
    /// Jump instruction to boot code. This field has two allowed forms:
    ///
    /// jmpBoot[0] = 0xEB, jmpBoot[1] = 0x??,
    /// jmpBoot[2] = 0x90
    ///
    /// and
    ///
    /// jmpBoot[0] = 0xE9, jmpBoot[1] = 0x??,
    /// jmpBoot[2] = 0x??
    bs_jmpboot: [u8; 3],
    /// OEM Name Identifier. Can be set by a FAT implementation to any desired
    /// value. Typically this is some indication of what system formatted the
    /// volume.
    bs_oemname: [u8; 8],

    /// Count of bytes per sector. Must equal [`crate::consts::SECTOR_SIZE`].
    pub(crate) bpb_bytspersec: U16,
    /// Number of sectors per allocation unit. Must be a power of 2 in [1, 128].
    pub(crate) bpb_secperclus: u8,
    /// Number of reserved sectors in the reserved region of the volume
    /// starting at the first sector of the volume, including the boot sector
    /// itself.
    pub(crate) bpb_rsvdseccnt: U16,
    /// The count of file allocation tables (FATs) on the volume. 1 or 2.
    pub(crate) bpb_numfats: u8,
    /// Must be 0 for FAT32.
    bpb_rootentcnt: U16,
    /// Must be 0 for FAT32; see `bpb_totsec32`.
    bpb_totsec16: U16,
    /// Media type. 0xF8 is standard for fixed media.
    bpb_media: u8,
    /// Must be 0 for FAT32; see `bpb_fatsz32`.
    bpb_fatsz16: U16,

    bpb_secpertrk: U16,
    bpb_numheads: U16,
    bpb_hiddsec: U32,

    /// Total count of sectors on the volume, all four regions included.
    pub(crate) bpb_totsec32: U32,

    /// FAT32 32-bit count of sectors occupied by one FAT.
    pub(crate) bpb_fatsz32: U32,
    /// Bits 0-3: zero-based active FAT if mirroring disabled (bit 7 set).
    bpb_extflags: U16,
    /// High byte major, low byte minor revision. Must be 0.
    bpb_fsver: U16,
    /// Cluster number of the first cluster of the root directory.
    pub(crate) bpb_rootclus: U32,
    /// Sector number of the FSInfo structure in the reserved area. Usually 1.
    pub(crate) bpb_fsinfo: U16,
    /// Sector number of a backup boot sector in the reserved area, or 0.
    bpb_bkbootsec: U16,
    bpb_reserved: [u8; 12],

    bs_drvnum: u8,
    bs_reserved1: u8,
    bs_bootsig: u8,
    bs_volid: U32,
    bs_vollab: [u8; 11],
    bs_filsystype: [u8; 8],

    bs_boot: [u8; 420],
    /// Must be 0x55, 0xAA at byte offsets 510, 511.
    signature_word: [u8; 2],
}

#[repr(C)]
#[derive(Debug, FromZeros, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct FsInfo {
    /// Must equal [`FSINFO_LEAD_SIGNATURE`].
    fsi_leadsig: U32,
    fsi_reserved1: [u8; 480],
    /// Must equal [`FSINFO_STRUCT_SIGNATURE`].
    fsi_strucsig: U32,
    /// Last known free cluster count, or 0xFFFFFFFF if unknown.
    pub(crate) fsi_free_count: U32,
    /// Cluster number at which the driver should start looking for free
    /// clusters, or 0xFFFFFFFF if unknown.
    pub(crate) fsi_nxt_free: U32,
    fsi_reserved2: [u8; 12],
    fsi_trailsig: U32,
}

/// Immutable layout of a mounted volume, derived once from the boot sector
/// and never recomputed afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub(crate) bytes_per_sector_log2: u8,
    pub(crate) sectors_per_cluster_log2: u8,
    pub(crate) fat_sector: u32,
    pub(crate) fat_sectors: u32,
    pub(crate) fat_count: u8,
    pub(crate) cluster_heap_sector: u32,
    pub(crate) cluster_count: u32,
    pub(crate) root_cluster: u32,
    pub(crate) info_sector: u32,
}

impl Geometry {
    pub(crate) fn parse(data_storage: &impl DataStorage) -> Result<Self> {
        let mut boot_sector = BootSector::new_zeroed();
        data_storage
            .read(0, boot_sector.as_mut_bytes())
            .map_err(crate::map_ds_err)?;

        if boot_sector.signature_word != [0x55, 0xAA] {
            error!("Boot sector signature is not 0x55AA");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let bytes_per_sector = boot_sector.bpb_bytspersec.get() as u32;
        if bytes_per_sector != 1 << SECTOR_EXP {
            error!("Bytes per sector ({bytes_per_sector}) must be {}", 1 << SECTOR_EXP);
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let bytes_per_sector_log2 = SECTOR_EXP as u8;

        let sectors_per_cluster = boot_sector.bpb_secperclus as u32;
        if !is_power_of_two(sectors_per_cluster) {
            error!("Sectors per cluster ({sectors_per_cluster}) must be a power of 2");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let sectors_per_cluster_log2 = sectors_per_cluster.ilog2() as u8;
        if sectors_per_cluster_log2 > 7 {
            error!("Sectors per cluster ({sectors_per_cluster_log2}) must be within [0, 7]");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let fat_count = boot_sector.bpb_numfats;
        if fat_count != 1 && fat_count != 2 {
            error!("Number of FATs ({fat_count}) must be 1 or 2");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        if boot_sector.bpb_fatsz16.get() != 0 || boot_sector.bpb_rootentcnt.get() != 0 {
            error!("FAT16/12 fields must be zero on a FAT32 volume");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let fat_sectors = boot_sector.bpb_fatsz32.get();
        if fat_sectors == 0 {
            error!("FAT size must be non-zero");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let fat_sector = boot_sector.bpb_rsvdseccnt.get() as u32;
        if fat_sector == 0 {
            error!("Reserved sector count must be non-zero");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let cluster_heap_sector = fat_sector + fat_sectors * fat_count as u32;
        let total_sectors = boot_sector.bpb_totsec32.get();
        if total_sectors <= cluster_heap_sector {
            error!("Total sector count ({total_sectors}) does not leave room for a data area");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let cluster_count =
            (total_sectors - cluster_heap_sector) >> sectors_per_cluster_log2;

        let root_cluster = boot_sector.bpb_rootclus.get();
        if root_cluster < 2 {
            error!("Root cluster ({root_cluster}) must be >= 2");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let info_sector = boot_sector.bpb_fsinfo.get() as u32;

        Ok(Self {
            bytes_per_sector_log2,
            sectors_per_cluster_log2,
            fat_sector,
            fat_sectors,
            fat_count,
            cluster_heap_sector,
            cluster_count,
            root_cluster,
            info_sector,
        })
    }

    pub(crate) fn cluster_size_log2(&self) -> u8 {
        self.bytes_per_sector_log2 + self.sectors_per_cluster_log2
    }

    pub(crate) fn sector_size(&self) -> usize {
        1 << self.bytes_per_sector_log2
    }

    pub(crate) fn cluster_size(&self) -> u64 {
        1 << self.cluster_size_log2()
    }

    /// Absolute sector of the first sector of `cluster`'s data.
    pub(crate) fn cluster_sector(&self, cluster: u32) -> u32 {
        self.cluster_heap_sector + ((cluster - 2) << self.sectors_per_cluster_log2)
    }

    pub(crate) fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_log2
    }

    pub(crate) fn entries_per_sector(&self) -> u32 {
        (self.sector_size() / 32) as u32
    }
}

pub(crate) fn read_info_sector(
    data_storage: &impl DataStorage,
    geometry: &Geometry,
) -> Result<FsInfo> {
    let mut info = FsInfo::new_zeroed();
    if geometry.info_sector == 0 {
        info.fsi_free_count = U32::new(u32::MAX);
        info.fsi_nxt_free = U32::new(u32::MAX);
        return Ok(info);
    }
    data_storage
        .read(
            (geometry.info_sector as u64) << geometry.bytes_per_sector_log2,
            info.as_mut_bytes(),
        )
        .map_err(crate::map_ds_err)?;
    if info.fsi_leadsig.get() != FSINFO_LEAD_SIGNATURE
        || info.fsi_strucsig.get() != FSINFO_STRUCT_SIGNATURE
    {
        error!("FSInfo signature mismatch");
        return Err(Error::Fs(FsError::Inconsistent));
    }
    Ok(info)
}

pub(crate) fn write_info_sector(
    data_storage: &impl DataStorage,
    geometry: &Geometry,
    free_count: u32,
    next_free: u32,
) -> Result<()> {
    if geometry.info_sector == 0 {
        return Ok(());
    }
    let mut info = FsInfo::new_zeroed();
    info.fsi_leadsig = U32::new(FSINFO_LEAD_SIGNATURE);
    info.fsi_strucsig = U32::new(FSINFO_STRUCT_SIGNATURE);
    info.fsi_free_count = U32::new(free_count);
    info.fsi_nxt_free = U32::new(next_free);
    info.fsi_trailsig = U32::new(FSINFO_TRAIL_SIGNATURE);
    data_storage
        .write(
            (geometry.info_sector as u64) << geometry.bytes_per_sector_log2,
            info.as_bytes(),
        )
        .map_err(crate::map_ds_err)
}

fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}
