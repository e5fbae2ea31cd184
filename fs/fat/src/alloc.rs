//! File allocation table walk, allocation and release.

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::{error, warn};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, IntoBytes};

use crate::consts::{cell_offset, is_cluster_free, is_eoc, CELL_COUNT, CLUSTER_EOC_VAL, CLUSTER_MASK};
use crate::pool::CommandContext;
use crate::Inner;

/// Volatile allocation bookkeeping, guarded by `Inner::consistency` together
/// with every other multi-sector operation so a crash mid-write can never be
/// observed from another thread.
pub(crate) struct Consistency {
    pub(crate) free_clusters: u32,
    pub(crate) next_free_hint: u32,
    pub(crate) info_dirty: bool,
}

impl<DS: DataStorage> Inner<DS> {
    fn fat_entry_sector(&self, cluster: u32) -> u32 {
        self.geometry.fat_sector + (cluster >> CELL_COUNT)
    }

    pub(crate) fn read_fat_entry(&self, cluster: u32) -> Result<u32> {
        let mut context = CommandContext::acquire(self, self.fat_entry_sector(cluster))?;
        let offset = cell_offset(cluster);
        let value = U32::read_from_bytes(&context.buffer()[offset..offset + 4])
            .map_err(|_| Error::Fs(FsError::Inconsistent))?;
        Ok(value.get())
    }

    pub(crate) fn write_fat_entry(&self, cluster: u32, value: u32) -> Result<()> {
        for copy in 0..self.geometry.fat_count as u32 {
            let sector = self.fat_entry_sector(cluster) + copy * self.geometry.fat_sectors;
            let mut context = CommandContext::acquire(self, sector)?;
            let offset = cell_offset(cluster);
            U32::new(value)
                .write_to(&mut context.buffer_mut()[offset..offset + 4])
                .map_err(|_| Error::Fs(FsError::Inconsistent))?;
            context.flush()?;
        }
        Ok(())
    }

    /// Next cluster in the chain, or `None` at end-of-chain.
    pub(crate) fn next_cluster(&self, cluster: u32) -> Result<Option<u32>> {
        let value = self.read_fat_entry(cluster)?;
        if is_eoc(value) {
            return Ok(None);
        }
        let masked = value & CLUSTER_MASK;
        if masked < 2 || masked > self.geometry.cluster_count + 1 {
            error!("FAT entry for cluster {cluster} points out of range ({masked})");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        Ok(Some(masked))
    }

    /// Finds and marks one free cluster as end-of-chain, without linking it
    /// to anything. Caller holds `consistency`.
    fn alloc_one(&self, consistency: &mut Consistency) -> Result<u32> {
        if consistency.free_clusters == 0 {
            warn!("No free clusters remain");
            return Err(Error::Fs(FsError::Full));
        }
        let total = self.geometry.cluster_count;
        let start = consistency.next_free_hint.max(2);
        for offset in 0..total {
            let candidate = 2 + (start - 2 + offset) % total;
            let value = self.read_fat_entry(candidate)?;
            if is_cluster_free(value) {
                self.write_fat_entry(candidate, CLUSTER_EOC_VAL)?;
                consistency.free_clusters -= 1;
                consistency.next_free_hint = candidate + 1;
                consistency.info_dirty = true;
                return Ok(candidate);
            }
        }
        error!("Free cluster count ({}) is inconsistent with the table", consistency.free_clusters);
        Err(Error::Fs(FsError::Inconsistent))
    }

    /// Allocates `count` clusters linked into a single chain and returns the
    /// first cluster. On partial failure, whatever was allocated is freed
    /// again before returning the error.
    pub(crate) fn alloc_chain(&self, consistency: &mut Consistency, count: u32) -> Result<u32> {
        assert!(count > 0);
        let first = self.alloc_one(consistency)?;
        let mut tail = first;
        for _ in 1..count {
            match self.alloc_one(consistency) {
                Ok(next) => {
                    self.write_fat_entry(tail, next)?;
                    tail = next;
                }
                Err(error) => {
                    self.free_chain(consistency, first).ok();
                    return Err(error);
                }
            }
        }
        Ok(first)
    }

    /// Appends one freshly allocated cluster after `tail` and returns it.
    pub(crate) fn append_cluster(&self, consistency: &mut Consistency, tail: u32) -> Result<u32> {
        let next = self.alloc_one(consistency)?;
        self.write_fat_entry(tail, next)?;
        Ok(next)
    }

    /// Frees every cluster in the chain starting at `first`.
    pub(crate) fn free_chain(&self, consistency: &mut Consistency, first: u32) -> Result<()> {
        let mut cluster = first;
        loop {
            let value = self.read_fat_entry(cluster)?;
            self.write_fat_entry(cluster, 0)?;
            consistency.free_clusters += 1;
            consistency.info_dirty = true;
            if is_eoc(value) {
                break;
            }
            let masked = value & CLUSTER_MASK;
            if masked < 2 || masked > self.geometry.cluster_count + 1 {
                error!("FAT entry for cluster {cluster} points out of range ({masked})");
                return Err(Error::Fs(FsError::Inconsistent));
            }
            cluster = masked;
        }
        Ok(())
    }

    /// Truncates the chain at `first` so it holds exactly `keep` clusters,
    /// freeing the remainder. Returns the (possibly unchanged) first
    /// cluster, or 0 if `keep == 0`.
    pub(crate) fn truncate_chain(
        &self,
        consistency: &mut Consistency,
        first: u32,
        keep: u32,
    ) -> Result<u32> {
        if keep == 0 {
            if first >= 2 {
                self.free_chain(consistency, first)?;
            }
            return Ok(0);
        }
        let mut cluster = first;
        for _ in 1..keep {
            cluster = self
                .next_cluster(cluster)?
                .ok_or(Error::Fs(FsError::Inconsistent))?;
        }
        if let Some(next) = self.next_cluster(cluster)? {
            self.write_fat_entry(cluster, CLUSTER_EOC_VAL)?;
            self.free_chain(consistency, next)?;
        }
        Ok(first)
    }

    pub(crate) fn flush_info_sector(&self, consistency: &mut Consistency) -> Result<()> {
        if !consistency.info_dirty {
            return Ok(());
        }
        crate::boot::write_info_sector(
            &self.data_storage,
            &self.geometry,
            consistency.free_clusters,
            consistency.next_free_hint,
        )?;
        consistency.info_dirty = false;
        Ok(())
    }
}
