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

//! File payload read/write/truncate.
//!
//! Unlike directory and FAT-table access, which goes through the pooled
//! [`crate::pool::CommandContext`] one sector at a time, bulk file data is
//! read and written directly against the [`DataStorage`] backing the
//! volume, the same way the original cluster-chain walk did: a run of
//! sectors within one cluster is contiguous on disk, so there is no benefit
//! to bouncing it through the single-sector cache.

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::error;

use crate::consts::FILE_SIZE_MAX;
use crate::node::FatNode;
use crate::Inner;

impl<DS: DataStorage> Inner<DS> {
    fn cluster_offset(&self, cluster: u32) -> u64 {
        (self.geometry.cluster_sector(cluster) as u64) << self.geometry.bytes_per_sector_log2
    }

    /// Walks a chain from `first` and returns the cluster at `skip` cluster
    /// hops, or `None` if the chain is shorter than that.
    fn cluster_at(&self, first: u32, mut skip: u64) -> Result<Option<u32>> {
        if first < 2 {
            return Ok(None);
        }
        let mut cluster = first;
        while skip > 0 {
            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(None),
            }
            skip -= 1;
        }
        Ok(Some(cluster))
    }
}

impl<DS: DataStorage> FatNode<DS> {
    pub(crate) fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if offset >= size {
            return Err(Error::Fs(FsError::EndOfFile));
        }
        let want = buffer.len().min((size - offset) as usize);
        if want == 0 {
            return Ok(0);
        }
        let cluster_size = self.handle.geometry.cluster_size();
        let first_cluster = self.first_cluster();

        let mut done = 0usize;
        while done < want {
            let file_pos = offset + done as u64;
            let cluster_index = file_pos / cluster_size;
            let in_cluster = file_pos % cluster_size;
            let Some(cluster) = self.handle.cluster_at(first_cluster, cluster_index)? else {
                error!("File chain is shorter than its recorded size");
                return Err(Error::Fs(FsError::Inconsistent));
            };
            let chunk = (want - done).min((cluster_size - in_cluster) as usize);
            self.handle
                .data_storage
                .read(
                    self.handle.cluster_offset(cluster) + in_cluster,
                    &mut buffer[done..done + chunk],
                )
                .map_err(crate::map_ds_err)?;
            done += chunk;
        }
        Ok(done)
    }

    pub(crate) fn write_at(&self, offset: u64, buffer: &[u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let new_end = offset.checked_add(buffer.len() as u64).ok_or(Error::Value)?;
        if new_end > FILE_SIZE_MAX as u64 {
            error!("Write would grow the file past the FAT32 4 GiB limit");
            return Err(Error::Value);
        }

        let cluster_size = self.handle.geometry.cluster_size();
        let mut consistency = self.handle.consistency.lock().unwrap();

        let mut first_cluster = self.first_cluster();
        let size = self.size();
        let clusters_needed = new_end.div_ceil(cluster_size);
        let clusters_have = if first_cluster < 2 {
            0
        } else {
            size.div_ceil(cluster_size).max(1)
        };

        if first_cluster < 2 {
            first_cluster = self.handle.alloc_chain(&mut consistency, clusters_needed.max(1) as u32)?;
        } else if clusters_needed > clusters_have {
            let mut tail = first_cluster;
            while let Some(next) = self.handle.next_cluster(tail)? {
                tail = next;
            }
            for _ in clusters_have..clusters_needed {
                tail = self.handle.append_cluster(&mut consistency, tail)?;
            }
        }

        let mut done = 0usize;
        while done < buffer.len() {
            let file_pos = offset + done as u64;
            let cluster_index = file_pos / cluster_size;
            let in_cluster = file_pos % cluster_size;
            let cluster = self
                .handle
                .cluster_at(first_cluster, cluster_index)?
                .ok_or(Error::Fs(FsError::Inconsistent))?;
            let chunk = (buffer.len() - done).min((cluster_size - in_cluster) as usize);
            self.handle
                .data_storage
                .write(
                    self.handle.cluster_offset(cluster) + in_cluster,
                    &buffer[done..done + chunk],
                )
                .map_err(crate::map_ds_err)?;
            done += chunk;
        }

        let new_size = size.max(new_end);
        self.handle.flush_info_sector(&mut consistency)?;
        drop(consistency);
        self.set_first_cluster_and_size(first_cluster, new_size)?;
        Ok(done)
    }

    pub(crate) fn truncate_file(&self, size: u64) -> Result<()> {
        if size > FILE_SIZE_MAX as u64 {
            return Err(Error::Value);
        }
        let cluster_size = self.handle.geometry.cluster_size();
        let first_cluster = self.first_cluster();
        let mut consistency = self.handle.consistency.lock().unwrap();

        let new_cluster_count = size.div_ceil(cluster_size) as u32;
        let new_first_cluster = if first_cluster < 2 {
            if new_cluster_count == 0 {
                0
            } else {
                self.handle.alloc_chain(&mut consistency, new_cluster_count)?
            }
        } else {
            self.handle
                .truncate_chain(&mut consistency, first_cluster, new_cluster_count)?
        };
        self.handle.flush_info_sector(&mut consistency)?;
        drop(consistency);
        self.set_first_cluster_and_size(new_first_cluster, size)
    }
}
