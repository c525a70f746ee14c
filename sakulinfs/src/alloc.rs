//! Node chain and free-list allocator.
//!
//! The data region is covered by a chain of nodes ordered by position and
//! doubly linked through `last_node`/`next_node`. The empty nodes of the chain
//! are additionally linked into the free list through `last_empty`/`next_empty`,
//! kept in physical order as well. Two empty nodes are never chain neighbours,
//! releasing a file always merges it with adjacent free space.

use log::debug;

use crate::error::{FsError, Result};
use crate::io::{Position, VolumeStorage};
use crate::node::{
    EmptyNode, FileNode, INode, Node, NodeTag, LAST_EMPTY_OFFSET, LAST_NODE_OFFSET,
    MIN_REQUIRE_SIZE, NEXT_EMPTY_OFFSET, NEXT_NODE_OFFSET, UNDEFINED,
};
use crate::sb::FILE_INDEX_START;
use crate::volume::Volume;

impl<S: VolumeStorage> Volume<S> {
    /// Allocates a file node holding `inode` and `data`.
    ///
    /// First fit over the free list. Returns `Ok(None)` without touching the
    /// volume when no free span is large enough.
    pub fn add_file(&mut self, inode: &INode, data: &[u8]) -> Result<Option<Position>> {
        INode::validate_name(&inode.name)?;
        let mut target = FileNode::new(inode.clone(), data.to_vec());
        let required = target.main_size();

        let mut pos = self.first_empty();
        let mut found = None;
        while pos != UNDEFINED {
            let empty = self.empty_at(pos)?;
            if empty.empty_size >= required {
                found = Some(empty);
                break;
            }
            pos = empty.next_empty;
        }
        let empty = match found {
            Some(empty) => empty,
            None => {
                debug!("add_file: no free span of {} bytes for {:?}", required, inode.name);
                return Ok(None);
            }
        };

        let remainder = empty.empty_size - required;
        target.last_node = empty.last_node;

        if remainder < MIN_REQUIRE_SIZE {
            // The whole span is taken, the remainder becomes slack of the file.
            target.expansion_size = remainder;
            target.next_node = empty.next_node;
            debug_assert_eq!(target.main_size(), empty.empty_size);

            self.dev.write_at(pos, &target.to_bytes())?;
            self.point_prev_empty_to(empty.last_empty, empty.next_empty)?;
            self.point_next_empty_to(empty.next_empty, empty.last_empty)?;
            debug!(
                "add_file: {:?} took all of {} at {} ({} bytes slack)",
                inode.name, empty.empty_size, pos, remainder
            );
        } else {
            let split = pos + required;
            let rest = EmptyNode::new(
                pos,
                empty.next_node,
                remainder,
                empty.last_empty,
                empty.next_empty,
            );
            target.next_node = split;

            self.dev.write_at(split, &rest.to_bytes())?;
            self.dev.write_at(pos, &target.to_bytes())?;
            self.point_next_node_to(empty.next_node, split)?;
            self.point_prev_empty_to(empty.last_empty, split)?;
            self.point_next_empty_to(empty.next_empty, split)?;
            debug!(
                "add_file: {:?} split {} at {}, {} bytes stay free at {}",
                inode.name, empty.empty_size, pos, remainder, split
            );
        }

        Ok(Some(pos))
    }

    /// Returns the file node at `pos` to the free list, merging it with any
    /// empty chain neighbour.
    pub fn remove_file_at(&mut self, pos: Position) -> Result<()> {
        let file = self.file_at(pos)?;
        let size = file.main_size();

        let last_is_empty = self.tag_at(file.last_node)? == Some(NodeTag::Empty);
        let next_is_empty = self.tag_at(file.next_node)? == Some(NodeTag::Empty);

        match (last_is_empty, next_is_empty) {
            (true, true) => {
                let next = self.empty_at(file.next_node)?;
                // Splice the right neighbour out of the free list first, the
                // left one absorbs it.
                self.point_prev_empty_to(next.last_empty, next.next_empty)?;
                self.point_next_empty_to(next.next_empty, next.last_empty)?;

                let mut last = self.empty_at(file.last_node)?;
                last.next_node = next.next_node;
                last.empty_size += size + next.empty_size;
                self.dev.write_at(file.last_node, &last.to_bytes())?;
                self.point_next_node_to(next.next_node, file.last_node)?;
                debug!(
                    "remove_file_at: {} merged both neighbours into {} ({} bytes)",
                    pos, file.last_node, last.empty_size
                );
            }
            (true, false) => {
                let mut last = self.empty_at(file.last_node)?;
                last.next_node = file.next_node;
                last.empty_size += size;
                self.dev.write_at(file.last_node, &last.to_bytes())?;
                self.point_next_node_to(file.next_node, file.last_node)?;
                debug!(
                    "remove_file_at: {} merged into previous empty {} ({} bytes)",
                    pos, file.last_node, last.empty_size
                );
            }
            (false, true) => {
                let next = self.empty_at(file.next_node)?;
                let merged = EmptyNode::new(
                    file.last_node,
                    next.next_node,
                    size + next.empty_size,
                    next.last_empty,
                    next.next_empty,
                );
                self.dev.write_at(pos, &merged.to_bytes())?;
                self.point_prev_empty_to(next.last_empty, pos)?;
                self.point_next_empty_to(next.next_empty, pos)?;
                self.point_next_node_to(next.next_node, pos)?;
                debug!(
                    "remove_file_at: {} absorbed next empty {} ({} bytes)",
                    pos, file.next_node, merged.empty_size
                );
            }
            (false, false) => {
                let last_empty = self.find_last_empty(file.last_node)?;
                let next_empty = if last_empty != UNDEFINED {
                    self.empty_at(last_empty)?.next_empty
                } else {
                    self.find_next_empty(file.next_node)?
                };
                let freed =
                    EmptyNode::new(file.last_node, file.next_node, size, last_empty, next_empty);
                self.dev.write_at(pos, &freed.to_bytes())?;
                self.point_prev_empty_to(last_empty, pos)?;
                self.point_next_empty_to(next_empty, pos)?;
                debug!(
                    "remove_file_at: {} became a standalone empty node ({} bytes)",
                    pos, size
                );
            }
        }
        Ok(())
    }

    /// Nearest empty node at or before `pos`, walking the chain backwards.
    pub(crate) fn find_last_empty(&mut self, mut pos: Position) -> Result<Position> {
        while pos != UNDEFINED {
            if self.tag_at(pos)? == Some(NodeTag::Empty) {
                return Ok(pos);
            }
            pos = self.read_u64(pos + LAST_NODE_OFFSET)?;
        }
        Ok(UNDEFINED)
    }

    /// Nearest empty node at or after `pos`, walking the chain forwards.
    pub(crate) fn find_next_empty(&mut self, mut pos: Position) -> Result<Position> {
        while pos != UNDEFINED {
            if self.tag_at(pos)? == Some(NodeTag::Empty) {
                return Ok(pos);
            }
            pos = self.read_u64(pos + NEXT_NODE_OFFSET)?;
        }
        Ok(UNDEFINED)
    }

    /// Makes the free-list predecessor `last_empty` (or the list head when
    /// there is none) point forward at `target`.
    fn point_prev_empty_to(&mut self, last_empty: Position, target: Position) -> Result<()> {
        if last_empty == UNDEFINED {
            self.update_first_empty(target)
        } else {
            self.write_u64(last_empty + NEXT_EMPTY_OFFSET, target)
        }
    }

    fn point_next_empty_to(&mut self, next_empty: Position, target: Position) -> Result<()> {
        if next_empty == UNDEFINED {
            return Ok(());
        }
        self.write_u64(next_empty + LAST_EMPTY_OFFSET, target)
    }

    fn point_next_node_to(&mut self, next_node: Position, target: Position) -> Result<()> {
        if next_node == UNDEFINED {
            return Ok(());
        }
        self.write_u64(next_node + LAST_NODE_OFFSET, target)
    }

    /// Every node of the chain in physical order.
    pub fn chain(&mut self) -> Result<Vec<(Position, Node)>> {
        let mut nodes = Vec::new();
        let mut pos = FILE_INDEX_START;
        while pos != UNDEFINED {
            let node = self.node_at(pos)?;
            let next = node.next_node();
            if next != UNDEFINED && next <= pos {
                return Err(FsError::format(
                    "Volume::chain",
                    format!("node at {} links backwards to {}", pos, next),
                ));
            }
            nodes.push((pos, node));
            pos = next;
        }
        Ok(nodes)
    }

    /// Positions on the free list, in list order.
    pub fn free_list(&mut self) -> Result<Vec<Position>> {
        let mut list = Vec::new();
        let mut pos = self.first_empty();
        while pos != UNDEFINED {
            if list.len() as u64 > self.size() / MIN_REQUIRE_SIZE {
                return Err(FsError::format("Volume::free_list", "free list has a cycle"));
            }
            list.push(pos);
            pos = self.empty_at(pos)?.next_empty;
        }
        Ok(list)
    }

    /// Read-only consistency check of the chain and the free list. Reports the
    /// first violation found as a format error.
    pub fn verify(&mut self) -> Result<()> {
        let fail = |reason: String| Err(FsError::format("Volume::verify", reason));
        let size = self.size();

        let mut empties = Vec::new();
        let mut pos = FILE_INDEX_START;
        let mut prev = UNDEFINED;
        let mut prev_was_empty = false;
        loop {
            let node = self.node_at(pos)?;
            if node.last_node() != prev {
                return fail(format!(
                    "node at {} links back to {}, expected {}",
                    pos,
                    node.last_node(),
                    prev
                ));
            }
            let end = match pos.checked_add(node.span()) {
                Some(end) if node.span() >= MIN_REQUIRE_SIZE && end <= size => end,
                _ => return fail(format!("node at {} has invalid span {}", pos, node.span())),
            };
            let is_empty = node.tag() == NodeTag::Empty;
            if is_empty {
                if prev_was_empty {
                    return fail(format!("empty nodes {} and {} are adjacent", prev, pos));
                }
                empties.push(pos);
            }

            if end == size {
                if node.next_node() != UNDEFINED {
                    return fail(format!("last node at {} links past the volume end", pos));
                }
                break;
            }
            if node.next_node() != end {
                return fail(format!(
                    "node at {} ends at {} but links to {}",
                    pos,
                    end,
                    node.next_node()
                ));
            }
            prev = pos;
            prev_was_empty = is_empty;
            pos = end;
        }

        let mut back = UNDEFINED;
        let mut listed = Vec::new();
        let mut pos = self.first_empty();
        while pos != UNDEFINED {
            if listed.len() >= empties.len() {
                return fail(format!("free list holds more than the {} empty nodes", empties.len()));
            }
            if self.tag_at(pos)? != Some(NodeTag::Empty) {
                return fail(format!("free list entry {} is not an empty node", pos));
            }
            let empty = self.empty_at(pos)?;
            if empty.last_empty != back {
                return fail(format!(
                    "free node {} links back to {}, expected {}",
                    pos, empty.last_empty, back
                ));
            }
            listed.push(pos);
            back = pos;
            pos = empty.next_empty;
        }
        if listed != empties {
            return fail(format!(
                "free list {:?} does not match empty nodes {:?}",
                listed, empties
            ));
        }
        Ok(())
    }
}
