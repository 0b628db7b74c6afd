use std::sync::Arc;

use crate::domain::ticket::{AttachmentBlob, TicketId};

const CACHE_LIMIT: usize = 32;

struct CacheEntry {
    scope: TicketId,
    attachment_id: String,
    blob: Arc<AttachmentBlob>,
}

/// Resolved attachment bytes, least recently used first.
#[derive(Default)]
pub struct AttachmentCache {
    entries: Vec<CacheEntry>,
}

impl AttachmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, scope: &TicketId, attachment_id: &str) -> Option<Arc<AttachmentBlob>> {
        let position = self
            .entries
            .iter()
            .position(|entry| &entry.scope == scope && entry.attachment_id == attachment_id)?;
        let entry = self.entries.remove(position);
        let blob = Arc::clone(&entry.blob);
        self.entries.push(entry);
        Some(blob)
    }

    pub fn insert(&mut self, scope: TicketId, attachment_id: String, blob: Arc<AttachmentBlob>) {
        self.entries
            .retain(|entry| !(entry.scope == scope && entry.attachment_id == attachment_id));
        self.entries.push(CacheEntry {
            scope,
            attachment_id,
            blob,
        });

        if self.entries.len() > CACHE_LIMIT {
            let overflow = self.entries.len() - CACHE_LIMIT;
            self.entries.drain(0..overflow);
        }
    }

    pub fn evict_scope(&mut self, scope: &TicketId) {
        self.entries.retain(|entry| &entry.scope != scope);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
