use serde::Serialize;

/// Maximum number of entries in one table.
pub const STRING_TABLE_CAPACITY: usize = 500;

/// Size of the backing string arena in bytes.
pub const STRING_ARENA_SIZE: usize = 16 * 1024;

/// One interned string, keyed by its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InternedString {
    pub hash: u32,
    /// Offset of the NUL-terminated text in the arena, if it was stored.
    pub arena_offset: Option<u32>,
    pub length: u32,
    pub reference_count: u32,
    pub flags: u8,
}

/// Result of an [`StringTable::intern`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternToken {
    /// The hash was already present; its reference count was bumped.
    Existing(usize),
    /// A new entry was created. `stored` tells whether its text fit the arena.
    Created { slot: usize, stored: bool },
    /// The table is full; nothing changed.
    NotStored,
}

impl InternToken {
    pub fn slot(self) -> Option<usize> {
        match self {
            InternToken::Existing(slot) | InternToken::Created { slot, .. } => Some(slot),
            InternToken::NotStored => None,
        }
    }
}

/// Bounded, reference-counted string table.
///
/// Entries are matched by hash alone. Two different strings with the same
/// hash share one entry and the second one's text is never compared or
/// stored. Callers treat the hash as the identity.
#[derive(Debug, Clone, Serialize)]
pub struct StringTable {
    entries: Vec<InternedString>,
    #[serde(skip)]
    arena: Vec<u8>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(STRING_TABLE_CAPACITY),
            arena: Vec::with_capacity(STRING_ARENA_SIZE),
        }
    }

    /// Interns `text` under `hash`.
    ///
    /// `length` is recorded on new entries even when `text` is `None`; it is
    /// clamped to the text's own length when text is given. Text
    /// is copied with a trailing NUL only while `used + length + 1` stays
    /// strictly below the arena size; otherwise the entry is created bare.
    pub fn intern(&mut self, hash: u32, text: Option<&[u8]>, length: usize) -> InternToken {
        if let Some(slot) = self.find(hash) {
            let entry = &mut self.entries[slot];
            entry.reference_count = entry.reference_count.saturating_add(1);
            return InternToken::Existing(slot);
        }

        if self.entries.len() >= STRING_TABLE_CAPACITY {
            return InternToken::NotStored;
        }

        let length = text.map_or(length, |bytes| length.min(bytes.len()));
        let arena_offset = text.and_then(|bytes| self.store(&bytes[..length]));
        let slot = self.entries.len();
        self.entries.push(InternedString {
            hash,
            arena_offset,
            length: length as u32,
            reference_count: 1,
            flags: 0,
        });

        InternToken::Created {
            slot,
            stored: arena_offset.is_some(),
        }
    }

    fn store(&mut self, bytes: &[u8]) -> Option<u32> {
        if self.arena.len() + bytes.len() + 1 >= STRING_ARENA_SIZE {
            return None;
        }
        let offset = self.arena.len() as u32;
        self.arena.extend_from_slice(bytes);
        self.arena.push(0);
        Some(offset)
    }

    /// Slot of the entry holding `hash`.
    pub fn find(&self, hash: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.hash == hash)
    }

    pub fn entry(&self, slot: usize) -> Option<&InternedString> {
        self.entries.get(slot)
    }

    pub fn entries(&self) -> &[InternedString] {
        &self.entries
    }

    /// Stored text of the entry for `hash`, without the terminator.
    pub fn resolve(&self, hash: u32) -> Option<&[u8]> {
        let entry = self.entries.get(self.find(hash)?)?;
        let start = entry.arena_offset? as usize;
        let end = start + entry.length as usize;
        self.arena.get(start..end)
    }

    pub fn resolve_str(&self, hash: u32) -> Option<&str> {
        self.resolve(hash).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Bytes of the arena in use, terminators included.
    pub fn arena_used(&self) -> usize {
        self.arena.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= STRING_TABLE_CAPACITY
    }

    /// Drops all entries and rewinds the arena.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.arena.clear();
    }
}
