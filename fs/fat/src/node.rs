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

//! Directory scanning, path lookup, and node create/remove/rename.

use std::sync::{Arc, Mutex};

use hyrax_ds::DataStorage;
use hyrax_fs::{Access, Entry, Error, FsError, NodeType, Result};
use log::error;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::consts::{LFN_ENTRY_LENGTH, LFN_LAST};
use crate::dirent::{
    fits_short_name, format_short_name, short_name_checksum, short_name_to_display,
    synthesize_short_name, utf16_to_utf8, utf8_to_utf16, DirAttr, RawDirEntry, RawLfnEntry,
};
use crate::pool::{acquire_node_guard, CommandContext, NodeGuard};
use crate::Inner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryLocation {
    pub(crate) sector: u32,
    pub(crate) offset: usize,
}

pub(crate) struct DirRecord {
    pub(crate) name: String,
    pub(crate) location: EntryLocation,
    pub(crate) run_start: EntryLocation,
    pub(crate) raw: RawDirEntry,
}

/// Position of a directory scan: the cluster currently being read and the
/// slot index within it. `cluster < 2` means the scan is exhausted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DirCursor {
    cluster: u32,
    slot: u32,
}

impl DirCursor {
    pub(crate) fn start(first_cluster: u32) -> Self {
        Self {
            cluster: first_cluster,
            slot: 0,
        }
    }
}

fn slot_location<DS: DataStorage>(inner: &Inner<DS>, cluster: u32, slot: u32) -> EntryLocation {
    let entries_per_sector = inner.geometry.entries_per_sector();
    let sector_in_cluster = slot / entries_per_sector;
    let offset = ((slot % entries_per_sector) * 32) as usize;
    EntryLocation {
        sector: inner.geometry.cluster_sector(cluster) + sector_in_cluster,
        offset,
    }
}

/// Advances `cursor` to the next directory record (a short entry, with its
/// preceding long-name run reassembled), or `None` at the directory's
/// logical end (a free slot with `dir_name[0] == 0`).
pub(crate) fn next_record<'h, DS: DataStorage>(
    inner: &'h Inner<DS>,
    cursor: &mut DirCursor,
) -> Result<Option<DirRecord>> {
    let slots_per_cluster = inner.geometry.sectors_per_cluster() * inner.geometry.entries_per_sector();

    let mut pending: Vec<[u16; LFN_ENTRY_LENGTH]> = Vec::new();
    let mut run_start: Option<EntryLocation> = None;
    let mut expected_ordinal: u8 = 0;
    let mut expected_checksum: u8 = 0;
    let mut bound_sector: Option<u32> = None;
    let mut context: Option<CommandContext<'h, DS>> = None;

    loop {
        if cursor.cluster < 2 {
            return Ok(None);
        }
        if cursor.slot >= slots_per_cluster {
            cursor.cluster = inner.next_cluster(cursor.cluster)?.unwrap_or(0);
            cursor.slot = 0;
            continue;
        }

        let location = slot_location(inner, cursor.cluster, cursor.slot);
        if bound_sector != Some(location.sector) {
            match context.as_mut() {
                Some(ctx) => ctx.bind(location.sector)?,
                None => {
                    context = Some(CommandContext::acquire(inner, location.sector)?);
                }
            }
            bound_sector = Some(location.sector);
        }
        let raw = RawDirEntry::read_from_bytes(
            &context.as_ref().unwrap().buffer()[location.offset..location.offset + 32],
        )
        .map_err(|_| Error::Fs(FsError::Inconsistent))?;
        cursor.slot += 1;

        if raw.is_free() {
            return Ok(None);
        }
        if raw.is_deleted() {
            pending.clear();
            run_start = None;
            continue;
        }

        if raw.attr().is_long_name() {
            let lfn = RawLfnEntry::read_from_bytes(
                &context.as_ref().unwrap().buffer()[location.offset..location.offset + 32],
            )
            .map_err(|_| Error::Fs(FsError::Inconsistent))?;
            if lfn.is_last() {
                pending.clear();
                pending.push(lfn.units());
                expected_ordinal = lfn.ordinal();
                expected_checksum = lfn.ldir_chksum;
                run_start = Some(location);
            } else if lfn.ordinal() + 1 == expected_ordinal && lfn.ldir_chksum == expected_checksum
            {
                pending.push(lfn.units());
                expected_ordinal = lfn.ordinal();
            } else {
                error!("Long name entry out of sequence, discarding run");
                pending.clear();
                run_start = None;
            }
            continue;
        }

        let name = if !pending.is_empty() && short_name_checksum(&raw.dir_name) == expected_checksum
        {
            let units: Vec<u16> = pending.iter().rev().flatten().copied().collect();
            utf16_to_utf8(units.into_iter().take_while(|&u| u != 0 && u != 0xFFFF))
        } else {
            short_name_to_display(&raw.dir_name)
        };

        if raw.attr().contains(DirAttr::VOLUME) {
            pending.clear();
            run_start = None;
            continue;
        }

        return Ok(Some(DirRecord {
            name,
            location,
            run_start: run_start.unwrap_or(location),
            raw,
        }));
    }
}

fn write_raw_entry<DS: DataStorage>(
    inner: &Inner<DS>,
    location: EntryLocation,
    raw: &RawDirEntry,
) -> Result<()> {
    let mut context = CommandContext::acquire(inner, location.sector)?;
    raw.write_to(&mut context.buffer_mut()[location.offset..location.offset + 32])
        .map_err(|_| Error::Fs(FsError::Inconsistent))?;
    context.flush()
}

fn mark_deleted<DS: DataStorage>(inner: &Inner<DS>, location: EntryLocation) -> Result<()> {
    let mut context = CommandContext::acquire(inner, location.sector)?;
    context.buffer_mut()[location.offset] = crate::consts::E_FLAG_EMPTY;
    context.flush()
}

/// Finds the child named `name` directly under the directory starting at
/// `first_cluster`. Lookups are case-insensitive, matching the original's
/// comparison of uppercased short names and of the reassembled long name.
pub(crate) fn lookup_child<DS: DataStorage>(
    inner: &Inner<DS>,
    first_cluster: u32,
    name: &str,
) -> Result<Option<DirRecord>> {
    let mut cursor = DirCursor::start(first_cluster);
    while let Some(record) = next_record(inner, &mut cursor)? {
        if record.name.eq_ignore_ascii_case(name) {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Finds a contiguous run of `slots_needed` free (or deleted) slots in the
/// directory, extending the chain by one cluster if none is found.
fn reserve_slots<DS: DataStorage>(
    inner: &Inner<DS>,
    consistency: &mut crate::alloc::Consistency,
    first_cluster: u32,
    slots_needed: u32,
) -> Result<EntryLocation> {
    let slots_per_cluster = inner.geometry.sectors_per_cluster() * inner.geometry.entries_per_sector();
    let mut cluster = first_cluster;
    let mut run: Vec<EntryLocation> = Vec::new();
    let mut tail = first_cluster;

    loop {
        for slot in 0..slots_per_cluster {
            let location = slot_location(inner, cluster, slot);
            let context = CommandContext::acquire(inner, location.sector)?;
            let first_byte = context.buffer()[location.offset];
            drop(context);
            if first_byte == crate::consts::E_FLAG_FREE || first_byte == crate::consts::E_FLAG_EMPTY {
                run.push(location);
                if run.len() as u32 == slots_needed {
                    return Ok(run[0]);
                }
            } else {
                run.clear();
            }
        }
        tail = cluster;
        match inner.next_cluster(cluster)? {
            Some(next) => cluster = next,
            None => break,
        }
    }

    // No room left: grow the directory by one cluster and zero it.
    let new_cluster = inner.append_cluster(consistency, tail)?;
    zero_cluster(inner, new_cluster)?;
    Ok(slot_location(inner, new_cluster, 0))
}

fn zero_cluster<DS: DataStorage>(inner: &Inner<DS>, cluster: u32) -> Result<()> {
    let zeros = vec![0u8; inner.geometry.sector_size()];
    for sector_offset in 0..inner.geometry.sectors_per_cluster() {
        let sector = inner.geometry.cluster_sector(cluster) + sector_offset;
        let mut context = CommandContext::acquire(inner, sector)?;
        context.buffer_mut().copy_from_slice(&zeros);
        context.flush()?;
    }
    Ok(())
}

/// Writes a complete record (LFN run, if needed, plus the short entry)
/// starting at `start`, advancing through the directory's cluster chain as
/// needed. `start` must already have been reserved via [`reserve_slots`],
/// which guarantees enough contiguous free slots follow it without crossing
/// into another cluster's worth of unallocated space, since the directory
/// was grown to fit.
fn write_record<DS: DataStorage>(
    inner: &Inner<DS>,
    start_cluster: u32,
    start_slot: u32,
    name: &str,
    raw: &RawDirEntry,
) -> Result<EntryLocation> {
    let units = utf8_to_utf16(name)?;
    let needs_lfn = !fits_short_name(name);
    let chunk_count = units.len().div_ceil(LFN_ENTRY_LENGTH).max(1);
    let checksum = short_name_checksum(&raw.dir_name);

    let mut slot = start_slot;
    let mut cluster = start_cluster;
    let mut advance = |inner: &Inner<DS>, slot: &mut u32, cluster: &mut u32| -> Result<()> {
        *slot += 1;
        let slots_per_cluster =
            inner.geometry.sectors_per_cluster() * inner.geometry.entries_per_sector();
        if *slot >= slots_per_cluster {
            *slot = 0;
            *cluster = inner
                .next_cluster(*cluster)?
                .ok_or(Error::Fs(FsError::Inconsistent))?;
        }
        Ok(())
    };

    if needs_lfn {
        for chunk_index in (0..chunk_count).rev() {
            let mut lfn = RawLfnEntry::new_zeroed();
            let ordinal = (chunk_index + 1) as u8;
            lfn.ldir_ord = if chunk_index == chunk_count - 1 {
                ordinal | LFN_LAST
            } else {
                ordinal
            };
            lfn.ldir_attr = DirAttr::LONG_NAME.bits();
            lfn.ldir_chksum = checksum;
            let mut piece = [0xFFFFu16; LFN_ENTRY_LENGTH];
            let base = chunk_index * LFN_ENTRY_LENGTH;
            for i in 0..LFN_ENTRY_LENGTH {
                if base + i < units.len() {
                    piece[i] = units[base + i];
                } else if base + i == units.len() {
                    piece[i] = 0;
                }
            }
            lfn.set_units(&piece);

            let location = slot_location(inner, cluster, slot);
            let mut context = CommandContext::acquire(inner, location.sector)?;
            lfn.write_to(&mut context.buffer_mut()[location.offset..location.offset + 32])
                .map_err(|_| Error::Fs(FsError::Inconsistent))?;
            context.flush()?;
            advance(inner, &mut slot, &mut cluster)?;
        }
    }

    let location = slot_location(inner, cluster, slot);
    write_raw_entry(inner, location, raw)?;
    Ok(location)
}

fn run_slot_count(name: &str) -> u32 {
    if fits_short_name(name) {
        1
    } else {
        let units = name.encode_utf16().count();
        1 + units.div_ceil(LFN_ENTRY_LENGTH) as u32
    }
}

struct NodeState {
    /// `None` for the root directory, which has no entry of its own.
    location: Option<EntryLocation>,
    run_start: Option<EntryLocation>,
    parent_cluster: u32,
    first_cluster: u32,
    size: u64,
}

/// A handle to one file or directory on a mounted FAT32 volume.
///
/// Cheap to [`Clone`]; every clone shares the same underlying state, so a
/// rename, write, or truncate performed through one clone is immediately
/// visible through the others.
pub struct FatNode<DS: DataStorage> {
    pub(crate) handle: Arc<Inner<DS>>,
    state: Arc<Mutex<NodeState>>,
    pub(crate) node_type: NodeType,
    pub(crate) access: Access,
    _budget: Arc<NodeGuard>,
}

impl<DS: DataStorage> Clone for FatNode<DS> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            state: self.state.clone(),
            node_type: self.node_type,
            access: self.access,
            _budget: self._budget.clone(),
        }
    }
}

impl<DS: DataStorage> FatNode<DS> {
    pub(crate) fn root(handle: Arc<Inner<DS>>) -> Result<Self> {
        let budget = acquire_node_guard(&handle.node_count, handle.node_capacity)?;
        Ok(Self {
            state: Arc::new(Mutex::new(NodeState {
                location: None,
                run_start: None,
                parent_cluster: 0,
                first_cluster: handle.geometry.root_cluster,
                size: 0,
            })),
            handle,
            node_type: NodeType::Root,
            access: Access::READ | Access::WRITE,
            _budget: budget,
        })
    }

    fn child(
        handle: Arc<Inner<DS>>,
        budget: Arc<NodeGuard>,
        parent_cluster: u32,
        record: &DirRecord,
    ) -> Self {
        let node_type = if record.raw.attr().contains(DirAttr::DIRECTORY) {
            NodeType::Directory
        } else {
            NodeType::File
        };
        let mut access = Access::READ;
        if !record.raw.attr().contains(DirAttr::RO) {
            access |= Access::WRITE;
        }
        Self {
            state: Arc::new(Mutex::new(NodeState {
                location: Some(record.location),
                run_start: Some(record.run_start),
                parent_cluster,
                first_cluster: record.raw.first_cluster(),
                size: record.raw.dir_filesize.get() as u64,
            })),
            handle,
            node_type,
            access,
            _budget: budget,
        }
    }

    pub(crate) fn first_cluster(&self) -> u32 {
        self.state.lock().unwrap().first_cluster
    }

    pub(crate) fn size(&self) -> u64 {
        self.state.lock().unwrap().size
    }

    /// Looks up `path` (`/`-separated, leading `/` optional) from the root.
    pub(crate) fn open_path(handle: &Arc<Inner<DS>>, path: &str) -> Result<Self> {
        let mut node = Self::root(handle.clone())?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = node.lookup(component)?;
        }
        Ok(node)
    }

    fn lookup(&self, name: &str) -> Result<Self> {
        if self.node_type == NodeType::File {
            error!("Cannot descend into a file");
            return Err(Error::Fs(FsError::Index));
        }
        let parent_cluster = self.first_cluster();
        let record = lookup_child(&self.handle, parent_cluster, name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        let budget = acquire_node_guard(&self.handle.node_count, self.handle.node_capacity)?;
        Ok(Self::child(self.handle.clone(), budget, parent_cluster, &record))
    }

    pub(crate) fn create_child(
        &self,
        name: &str,
        node_type: NodeType,
        access: Access,
    ) -> Result<Self> {
        if self.node_type == NodeType::File {
            error!("Cannot create an entry under a file");
            return Err(Error::Fs(FsError::Index));
        }
        let parent_cluster = self.first_cluster();

        let mut consistency = self.handle.consistency.lock().unwrap();
        if lookup_child(&self.handle, parent_cluster, name)?.is_some() {
            return Err(Error::Fs(FsError::Exist));
        }

        let first_cluster = if node_type == NodeType::Directory {
            self.handle.alloc_chain(&mut consistency, 1)?
        } else {
            0
        };
        if node_type == NodeType::Directory {
            init_directory_cluster(&self.handle, first_cluster, parent_cluster)?;
        }

        let mut raw = RawDirEntry::new_zeroed();
        let short_name = if fits_short_name(name) {
            format_short_name(name)
        } else {
            synthesize_short_name(name, |candidate| {
                lookup_child(&self.handle, parent_cluster, &short_name_to_display(candidate))
                    .ok()
                    .flatten()
                    .is_some()
            })?
        };
        raw.dir_name = short_name;
        let mut attr = DirAttr::empty();
        if node_type == NodeType::Directory {
            attr |= DirAttr::DIRECTORY;
        }
        if !access.contains(Access::WRITE) {
            attr |= DirAttr::RO;
        }
        raw.dir_attr = attr.bits();
        raw.set_first_cluster(first_cluster);
        let stamp = self.handle.clock.now().into();
        raw.set_created(stamp);

        let slots_needed = run_slot_count(name);
        let start = reserve_slots(&self.handle, &mut consistency, parent_cluster, slots_needed)?;
        let location = write_record_at(&self.handle, start, name, &raw)?;
        self.handle.flush_info_sector(&mut consistency)?;
        drop(consistency);

        let budget = acquire_node_guard(&self.handle.node_count, self.handle.node_capacity)?;
        let record = DirRecord {
            name: name.to_string(),
            location,
            run_start: location,
            raw,
        };
        Ok(Self::child(self.handle.clone(), budget, parent_cluster, &record))
    }

    pub(crate) fn remove(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        let (location, run_start, first_cluster) = match state.location {
            Some(location) => (location, state.run_start.unwrap_or(location), state.first_cluster),
            None => {
                error!("Cannot remove the root directory");
                return Err(Error::Fs(FsError::Access));
            }
        };
        if self.node_type == NodeType::Directory {
            let mut cursor = DirCursor::start(first_cluster);
            if next_record(&self.handle, &mut cursor)?.is_some() {
                return Err(Error::Fs(FsError::Empty));
            }
        }
        drop(state);

        let mut consistency = self.handle.consistency.lock().unwrap();
        if first_cluster >= 2 {
            self.handle.free_chain(&mut consistency, first_cluster)?;
        }
        self.handle.flush_info_sector(&mut consistency)?;
        drop(consistency);

        delete_run(&self.handle, run_start, location)?;
        Ok(())
    }

    pub(crate) fn rename(&self, new_parent: &Self, new_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (old_location, old_run_start) = match (state.location, state.run_start) {
            (Some(l), r) => (l, r.unwrap_or(l)),
            (None, _) => {
                error!("Cannot rename the root directory");
                return Err(Error::Fs(FsError::Access));
            }
        };
        let new_parent_cluster = new_parent.first_cluster();

        let mut consistency = self.handle.consistency.lock().unwrap();
        if lookup_child(&self.handle, new_parent_cluster, new_name)?.is_some() {
            return Err(Error::Fs(FsError::Exist));
        }

        let mut raw = {
            let context = CommandContext::acquire(&self.handle, old_location.sector)?;
            RawDirEntry::read_from_bytes(
                &context.buffer()[old_location.offset..old_location.offset + 32],
            )
            .map_err(|_| Error::Fs(FsError::Inconsistent))?
        };
        let short_name = if fits_short_name(new_name) {
            format_short_name(new_name)
        } else {
            synthesize_short_name(new_name, |candidate| {
                lookup_child(
                    &self.handle,
                    new_parent_cluster,
                    &short_name_to_display(candidate),
                )
                .ok()
                .flatten()
                .is_some()
            })?
        };
        raw.dir_name = short_name;

        let slots_needed = run_slot_count(new_name);
        let start = reserve_slots(&self.handle, &mut consistency, new_parent_cluster, slots_needed)?;
        let new_location = write_record_at(&self.handle, start, new_name, &raw)?;

        delete_run(&self.handle, old_run_start, old_location)?;
        self.handle.flush_info_sector(&mut consistency)?;
        drop(consistency);

        state.location = Some(new_location);
        state.run_start = Some(start);
        state.parent_cluster = new_parent_cluster;
        Ok(())
    }

    pub(crate) fn iter_entries(&self) -> Result<Vec<Entry<Self>>> {
        if self.node_type == NodeType::File {
            error!("Cannot iterate a file");
            return Err(Error::Fs(FsError::Index));
        }
        let first_cluster = self.first_cluster();
        let mut cursor = DirCursor::start(first_cluster);
        let mut entries = Vec::new();
        while let Some(record) = next_record(&self.handle, &mut cursor)? {
            if record.name == "." || record.name == ".." {
                continue;
            }
            let budget = acquire_node_guard(&self.handle.node_count, self.handle.node_capacity)?;
            let node = Self::child(self.handle.clone(), budget, first_cluster, &record);
            entries.push(Entry {
                node_type: node.node_type,
                length: node.size(),
                name: record.name,
                node,
            });
        }
        Ok(entries)
    }

    pub(crate) fn set_first_cluster_and_size(&self, first_cluster: u32, size: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.first_cluster = first_cluster;
        state.size = size;
        if let Some(location) = state.location {
            let mut context = CommandContext::acquire(&self.handle, location.sector)?;
            let mut raw = RawDirEntry::read_from_bytes(
                &context.buffer()[location.offset..location.offset + 32],
            )
            .map_err(|_| Error::Fs(FsError::Inconsistent))?;
            raw.set_first_cluster(first_cluster);
            raw.dir_filesize = zerocopy::little_endian::U32::new(size as u32);
            let stamp = self.handle.clock.now().into();
            raw.set_modified(stamp);
            raw.write_to(&mut context.buffer_mut()[location.offset..location.offset + 32])
                .map_err(|_| Error::Fs(FsError::Inconsistent))?;
            context.flush()?;
        }
        Ok(())
    }
}

fn write_record_at<DS: DataStorage>(
    inner: &Inner<DS>,
    start: EntryLocation,
    name: &str,
    raw: &RawDirEntry,
) -> Result<EntryLocation> {
    let (cluster, slot) = location_to_cluster_slot(inner, start)?;
    write_record(inner, cluster, slot, name, raw)
}

/// Recovers `(cluster, slot)` from an absolute sector, by scanning the
/// cluster chain that contains it. `reserve_slots` hands back a location in
/// the same directory whose first cluster the caller already knows, so this
/// is only ever called with a sector that does belong to that chain.
fn location_to_cluster_slot<DS: DataStorage>(
    inner: &Inner<DS>,
    location: EntryLocation,
) -> Result<(u32, u32)> {
    let sectors_per_cluster = inner.geometry.sectors_per_cluster();
    let cluster = (location.sector - inner.geometry.cluster_heap_sector) / sectors_per_cluster + 2;
    let sector_in_cluster = (location.sector - inner.geometry.cluster_heap_sector) % sectors_per_cluster;
    let slot = sector_in_cluster * inner.geometry.entries_per_sector()
        + (location.offset / 32) as u32;
    Ok((cluster, slot))
}

fn delete_run<DS: DataStorage>(
    inner: &Inner<DS>,
    run_start: EntryLocation,
    short_location: EntryLocation,
) -> Result<()> {
    let (mut cluster, mut slot) = location_to_cluster_slot(inner, run_start)?;
    let (end_cluster, end_slot) = location_to_cluster_slot(inner, short_location)?;
    loop {
        let location = slot_location(inner, cluster, slot);
        mark_deleted(inner, location)?;
        if cluster == end_cluster && slot == end_slot {
            break;
        }
        slot += 1;
        let slots_per_cluster =
            inner.geometry.sectors_per_cluster() * inner.geometry.entries_per_sector();
        if slot >= slots_per_cluster {
            slot = 0;
            cluster = inner
                .next_cluster(cluster)?
                .ok_or(Error::Fs(FsError::Inconsistent))?;
        }
    }
    Ok(())
}

/// Initializes a freshly allocated directory cluster with `.` and `..`
/// entries, per the FAT32 convention (the root directory has neither).
fn init_directory_cluster<DS: DataStorage>(
    inner: &Inner<DS>,
    cluster: u32,
    parent_cluster: u32,
) -> Result<()> {
    zero_cluster(inner, cluster)?;
    let mut dot = RawDirEntry::new_zeroed();
    dot.dir_name = format_short_name(".");
    dot.dir_attr = DirAttr::DIRECTORY.bits();
    dot.set_first_cluster(cluster);
    write_raw_entry(inner, slot_location(inner, cluster, 0), &dot)?;

    let mut dotdot = RawDirEntry::new_zeroed();
    dotdot.dir_name = format_short_name("..");
    dotdot.dir_attr = DirAttr::DIRECTORY.bits();
    dotdot.set_first_cluster(if parent_cluster == inner.geometry.root_cluster {
        0
    } else {
        parent_cluster
    });
    write_raw_entry(inner, slot_location(inner, cluster, 1), &dotdot)
}
