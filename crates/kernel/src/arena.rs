//! Generational storage for chunks.
//!
//! A [`ChunkId`] stays valid until its chunk is removed; after that the slot
//! may be reused under a new generation, so stale ids never alias a new chunk.

use std::fmt;

use crate::chunk::Chunk;

/// Stable handle to a chunk owned by a [`crate::Space`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    chunk: Option<Chunk>,
}

#[derive(Debug, Default)]
pub(crate) struct ChunkArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ChunkArena {
    pub fn insert(&mut self, chunk: Chunk) -> ChunkId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.chunk = Some(chunk);
            return ChunkId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            chunk: Some(chunk),
        });
        ChunkId {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, id: ChunkId) -> Option<Chunk> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let chunk = slot.chunk.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(chunk)
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.chunk.as_ref())
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.chunk.as_mut())
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.chunk.as_ref().map(|c| {
                (
                    ChunkId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    c,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<ChunkId> {
        self.iter().map(|(id, _)| id).collect()
    }
}
