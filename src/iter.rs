use std::iter::FusedIterator;
use std::sync::atomic::Ordering;

use crate::compressed::ByteNode;
use crate::dynamic_array::Node;
use crate::varint;

/// Iterator over the elements of a [`DynamicArray`](crate::DynamicArray)
/// in append order.
///
/// Created by [`DynamicArray::iter`](crate::DynamicArray::iter). Moves
/// slot by slot within a node and follows the node link at each boundary.
/// An exhausted iterator holds no node and stays exhausted.
pub struct Iter<'a, T> {
    node: Option<&'a Node<T>>,
    index: usize,
    /// Published length of `node`, read when the iterator entered it.
    len: usize,
}

impl<'a, T> Iter<'a, T> {
    pub(crate) fn new(head: &'a Node<T>) -> Self {
        Self {
            node: Some(head),
            index: 0,
            len: head.len(),
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node?;
            if self.index < self.len {
                // SAFETY: index < len, which was a published length.
                let item = unsafe { node.get_unchecked(self.index) };
                self.index += 1;
                return Some(item);
            }
            self.node = node.next();
            self.index = 0;
            self.len = self.node.map_or(0, Node::len);
        }
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            index: self.index,
            len: self.len,
        }
    }
}

/// Iterator decoding the values of a
/// [`CompressedArray`](crate::CompressedArray) in insertion order.
///
/// Created by [`CompressedArray::iter`](crate::CompressedArray::iter).
#[derive(Clone)]
pub struct CompressedIter<'a> {
    node: Option<&'a ByteNode>,
    /// Byte offset of the next value within `node`.
    pos: usize,
    len: usize,
}

impl<'a> CompressedIter<'a> {
    pub(crate) fn new(head: &'a ByteNode) -> Self {
        Self {
            node: Some(head),
            pos: 0,
            len: head.len(),
        }
    }
}

impl Iterator for CompressedIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node?;
            if self.pos < self.len {
                let bytes = node.bytes()[self.pos..self.len]
                    .iter()
                    .map(|byte| byte.load(Ordering::Acquire));
                // Bytes below the published length always hold whole values.
                if let Some((value, width)) = varint::decode(bytes) {
                    self.pos += width;
                    return Some(value);
                }
            }
            self.node = node.next();
            self.pos = 0;
            self.len = self.node.map_or(0, ByteNode::len);
        }
    }
}

impl FusedIterator for CompressedIter<'_> {}
