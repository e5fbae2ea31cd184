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

//! A read/write FAT32 file system for the Hyrax operating system.
//!
//! [`FatFileSystem::mount`] parses the boot sector and FSInfo sector of a
//! [`DataStorage`] and returns a handle implementing [`hyrax_fs::FileSystem`].
//! [`mkfs::format`] writes a fresh, empty FAT32 volume to one.

mod alloc;
mod boot;
mod consts;
mod dirent;
mod file;
pub mod mkfs;
mod node;
mod pool;
pub mod time;

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use hyrax_ds::DataStorage;
use hyrax_fs::{Access, Clock, Entry, Error, FileSystem, FsError, NodeType, Result};
use log::error;

use crate::alloc::Consistency;
use crate::boot::Geometry;
use crate::pool::Pool;
use crate::time::SystemClock;

pub use crate::mkfs::FormatOptions;
pub use crate::node::FatNode;
pub use crate::time::FixedClock;

/// Options controlling resource usage of a mounted volume; everything here
/// bounds memory rather than affecting on-disk format.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Number of pooled single-sector buffers used for directory and FAT
    /// access. Must be at least 2 (one for the entry being modified, one
    /// for its LFN run or the FAT sector it shares a lock step with).
    pub context_pool_size: usize,
    /// Maximum number of simultaneously open [`FatNode`] handles.
    pub max_open_nodes: usize,
    /// Source of timestamps for newly created and modified entries.
    pub clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            context_pool_size: 8,
            max_open_nodes: 256,
            clock: None,
        }
    }
}

/// Shared, immutable-after-mount state plus the two mutexes that guard
/// everything mutable. Every [`FatNode`] clone holds an `Arc` to the same
/// `Inner`.
///
/// Lock order is fixed: `consistency` (held for the whole of any operation
/// that touches more than one sector) is always acquired before `pool`
/// (held only transiently, to pop or push a buffer, never across I/O).
pub(crate) struct Inner<DS: DataStorage> {
    data_storage: DS,
    geometry: Geometry,
    clock: Arc<dyn Clock + Send + Sync>,
    consistency: Mutex<Consistency>,
    pool: Mutex<Pool>,
    node_count: Arc<AtomicUsize>,
    node_capacity: usize,
}

/// A mounted FAT32 volume.
pub struct FatFileSystem<DS: DataStorage> {
    handle: Arc<Inner<DS>>,
}

impl<DS: DataStorage> FatFileSystem<DS> {
    /// Parses the boot sector and FSInfo sector of `data_storage` and
    /// returns a handle to the mounted volume.
    pub fn mount(data_storage: DS, options: MountOptions) -> Result<Self> {
        let geometry = Geometry::parse(&data_storage)?;
        let info = boot::read_info_sector(&data_storage, &geometry)?;
        let free_clusters = if info.fsi_free_count.get() == u32::MAX {
            count_free_clusters(&data_storage, &geometry)?
        } else {
            info.fsi_free_count.get()
        };
        let next_free_hint = if info.fsi_nxt_free.get() == u32::MAX {
            2
        } else {
            info.fsi_nxt_free.get()
        };

        if options.context_pool_size < 2 {
            error!("Context pool size must be at least 2");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let handle = Arc::new(Inner {
            pool: Mutex::new(Pool::new(options.context_pool_size, geometry.sector_size())),
            data_storage,
            geometry,
            clock: options.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            consistency: Mutex::new(Consistency {
                free_clusters,
                next_free_hint,
                info_dirty: false,
            }),
            node_count: Arc::new(AtomicUsize::new(0)),
            node_capacity: options.max_open_nodes,
        });
        Ok(Self { handle })
    }

    /// Flushes any pending FSInfo update (free cluster count, allocation
    /// hint). Directory and file data are already write-through.
    pub fn sync(&self) -> Result<()> {
        let mut consistency = self.handle.consistency.lock().unwrap();
        self.handle.flush_info_sector(&mut consistency)
    }

    /// Flushes any pending FSInfo update and consumes the handle. Pools and
    /// mutexes are released as `self.handle`'s last `Arc` is dropped.
    pub fn unmount(self) -> Result<()> {
        self.sync()
    }
}

/// Recomputes the free cluster count by walking the whole FAT, used when
/// the FSInfo sector reports an unknown count (0xFFFFFFFF).
fn count_free_clusters<DS: DataStorage>(data_storage: &DS, geometry: &Geometry) -> Result<u32> {
    let mut free = 0u32;
    for cluster in 2..geometry.cluster_count + 2 {
        let sector = geometry.fat_sector + (cluster >> consts::CELL_COUNT);
        let offset = consts::cell_offset(cluster);
        let mut entry = [0u8; 4];
        data_storage
            .read(((sector as u64) << geometry.bytes_per_sector_log2) + offset as u64, &mut entry)
            .map_err(map_ds_err)?;
        if consts::is_cluster_free(u32::from_le_bytes(entry)) {
            free += 1;
        }
    }
    Ok(free)
}

pub(crate) fn map_ds_err(error: hyrax_ds::Error) -> Error {
    use hyrax_fs::IoError;
    match error {
        hyrax_ds::Error::ReadOnly => Error::Io(IoError::ReadOnly),
        hyrax_ds::Error::ShortRead => Error::Io(IoError::Read),
        hyrax_ds::Error::ShortWrite | hyrax_ds::Error::Io(_) => Error::Io(IoError::Write),
    }
}

pub struct DirIter<DS: DataStorage> {
    inner: std::vec::IntoIter<Entry<FatNode<DS>>>,
}

impl<DS: DataStorage> Iterator for DirIter<DS> {
    type Item = Result<Entry<FatNode<DS>>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }
}

impl<DS: DataStorage> FileSystem for FatFileSystem<DS> {
    type Node = FatNode<DS>;
    type Iter = DirIter<DS>;

    fn node_open(&self, path: &str) -> Result<Self::Node> {
        FatNode::open_path(&self.handle, path)
    }

    fn node_create(
        &self,
        parent: &Self::Node,
        name: &str,
        node_type: NodeType,
        access: Access,
    ) -> Result<Self::Node> {
        parent.create_child(name, node_type, access)
    }

    fn node_remove(&self, node: &Self::Node) -> Result<()> {
        node.remove()
    }

    fn node_rename(
        &self,
        node: &Self::Node,
        new_parent: &Self::Node,
        new_name: &str,
    ) -> Result<()> {
        node.rename(new_parent, new_name)
    }

    fn node_iter(&self, node: &Self::Node) -> Result<Self::Iter> {
        Ok(DirIter {
            inner: node.iter_entries()?.into_iter(),
        })
    }

    fn node_length(&self, node: &Self::Node) -> Result<u64> {
        Ok(node.size())
    }

    fn node_read(&self, node: &Self::Node, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        node.read_at(offset, buffer)
    }

    fn node_write(&self, node: &Self::Node, offset: u64, buffer: &[u8]) -> Result<usize> {
        node.write_at(offset, buffer)
    }

    fn node_truncate(&self, node: &Self::Node, size: u64) -> Result<()> {
        node.truncate_file(size)
    }

    fn sync(&self) -> Result<()> {
        FatFileSystem::sync(self)
    }
}

#[cfg(test)]
mod tests {
    use hyrax_ds_std::DataStorageServer;
    use tempfile::NamedTempFile;

    use super::*;

    fn make_volume(sectors: u32) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(sectors as u64 * 512).unwrap();
        file
    }

    fn mount_fresh(sectors: u32) -> FatFileSystem<DataStorageServer> {
        let file = make_volume(sectors);
        let data_storage = DataStorageServer::open(file.path()).unwrap();
        mkfs::format(&data_storage, FormatOptions::default()).unwrap();
        std::mem::forget(file);
        FatFileSystem::mount(data_storage, MountOptions::default()).unwrap()
    }

    #[test]
    fn mount_formats_and_reads_empty_root() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let entries: Vec<_> = fs.node_iter(&root).unwrap().collect::<Result<_>>().unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn create_write_read_roundtrip() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let file = fs
            .node_create(&root, "hello.txt", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();

        let written = fs.node_write(&file, 0, b"hello, fat32").unwrap();
        assert_eq!(written, 12);
        assert_eq!(fs.node_length(&file).unwrap(), 12);

        let mut buffer = [0u8; 12];
        let read = fs.node_read(&file, 0, &mut buffer).unwrap();
        assert_eq!(read, 12);
        assert_eq!(&buffer, b"hello, fat32");
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        fs.node_create(&root, "a", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();
        let err = fs
            .node_create(&root, "a", NodeType::File, Access::READ | Access::WRITE)
            .unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::Exist)));
    }

    #[test]
    fn long_file_name_round_trips_through_directory_scan() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let long_name = "a rather long file name with spaces.txt";
        fs.node_create(&root, long_name, NodeType::File, Access::READ | Access::WRITE)
            .unwrap();

        let entries: Vec<_> = fs.node_iter(&root).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, long_name);
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let dir = fs
            .node_create(&root, "sub", NodeType::Directory, Access::READ | Access::WRITE)
            .unwrap();
        let file = fs
            .node_create(&root, "moveme.txt", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();

        fs.node_rename(&file, &dir, "moved.txt").unwrap();

        assert!(matches!(
            fs.node_open("/moveme.txt").unwrap_err(),
            Error::Fs(FsError::NotFound)
        ));
        let moved = fs.node_open("/sub/moved.txt").unwrap();
        assert_eq!(fs.node_length(&moved).unwrap(), 0);
    }

    #[test]
    fn remove_rejects_non_empty_directory() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let dir = fs
            .node_create(&root, "sub", NodeType::Directory, Access::READ | Access::WRITE)
            .unwrap();
        fs.node_create(&dir, "f", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();

        let err = fs.node_remove(&dir).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::Empty)));
    }

    #[test]
    fn truncate_grows_and_shrinks_file() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let file = fs
            .node_create(&root, "grow.bin", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();

        fs.node_truncate(&file, 9000).unwrap();
        assert_eq!(fs.node_length(&file).unwrap(), 9000);

        fs.node_truncate(&file, 10).unwrap();
        assert_eq!(fs.node_length(&file).unwrap(), 10);
    }

    #[test]
    fn write_spanning_multiple_clusters() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let file = fs
            .node_create(&root, "big.bin", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();

        let payload: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        fs.node_write(&file, 0, &payload).unwrap();

        let mut readback = vec![0u8; payload.len()];
        fs.node_read(&file, 0, &mut readback).unwrap();
        assert_eq!(readback, payload);
    }

    #[test]
    fn read_at_or_past_end_of_file_is_an_error() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        let file = fs
            .node_create(&root, "short.bin", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();
        fs.node_write(&file, 0, b"abc").unwrap();

        let mut buffer = [0u8; 4];
        let err = fs.node_read(&file, 3, &mut buffer).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::EndOfFile)));
        let err = fs.node_read(&file, 100, &mut buffer).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::EndOfFile)));
    }

    #[test]
    fn unmount_flushes_and_consumes_handle() {
        let fs = mount_fresh(16384);
        let root = fs.node_open("/").unwrap();
        fs.node_create(&root, "f", NodeType::File, Access::READ | Access::WRITE)
            .unwrap();
        fs.unmount().unwrap();
    }

    #[test]
    fn format_with_label_writes_volume_entry() {
        let file = make_volume(512);
        let data_storage = DataStorageServer::open(file.path()).unwrap();
        mkfs::format(
            &data_storage,
            FormatOptions {
                label: Some("my disk".to_string()),
                ..FormatOptions::default()
            },
        )
        .unwrap();
        std::mem::forget(file);

        let mut boot = [0u8; 512];
        data_storage.read(0, &mut boot).unwrap();
        assert_eq!(&boot[71..82], b"MY DISK    ");

        // Root cluster starts right after reserved sectors + both FAT copies.
        let root_sector = 32 + 1 * 2;
        let mut root = [0u8; 32];
        data_storage.read(root_sector as u64 * 512, &mut root).unwrap();
        assert_eq!(&root[0..11], b"MY DISK    ");
        assert_eq!(root[11], DirAttr::VOLUME.bits());
    }
}
