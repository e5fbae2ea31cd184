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

pub use hyrax_err::*;

use bitflags::bitflags;

bitflags! {
    /// Capabilities requested when opening or creating a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Root,
    Directory,
    File,
}

/// A single directory entry surfaced while iterating a directory.
#[derive(Debug, Clone)]
pub struct Entry<Node> {
    pub node: Node,
    pub name: String,
    pub node_type: NodeType,
    pub length: u64,
}

/// Broken-down local time, as produced by the real-time clock collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Source of the current time for newly created or modified entries.
pub trait Clock {
    fn now(&self) -> DateTime;
}

/// The node-oriented filesystem interface a mounted volume implements.
///
/// `Node` is an opaque, cheaply cloned handle to a directory entry;
/// callers obtain one via [`FileSystem::node_open`] or
/// [`FileSystem::node_create`] and pass it back into every other method.
pub trait FileSystem {
    type Node: Clone;
    type Iter: Iterator<Item = Result<Entry<Self::Node>>>;

    fn node_open(&self, path: &str) -> Result<Self::Node>;

    fn node_create(
        &self,
        parent: &Self::Node,
        name: &str,
        node_type: NodeType,
        access: Access,
    ) -> Result<Self::Node>;

    fn node_remove(&self, node: &Self::Node) -> Result<()>;

    fn node_rename(
        &self,
        node: &Self::Node,
        new_parent: &Self::Node,
        new_name: &str,
    ) -> Result<()>;

    fn node_iter(&self, node: &Self::Node) -> Result<Self::Iter>;

    fn node_length(&self, node: &Self::Node) -> Result<u64>;

    fn node_read(&self, node: &Self::Node, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    fn node_write(&self, node: &Self::Node, offset: u64, buffer: &[u8]) -> Result<usize>;

    fn node_truncate(&self, node: &Self::Node, size: u64) -> Result<()>;

    fn sync(&self) -> Result<()>;
}
