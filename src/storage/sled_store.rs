//! Sled-based storage for conversation metadata.
//!
//! Conversation rows are bincode-encoded and keyed by the big-endian id, so
//! iteration order is id order. Row updates go through `update_and_fetch`,
//! which keeps a content touch and a rename racing on the same row from
//! losing either change.

use sled::{Db, Tree};
use std::sync::Arc;
use tracing::debug;

use super::{Conversation, DocumentId, MetadataStore, StorageConfig, StorageError, StorageResult};

/// Tree names for different data types
const TREE_CONVERSATIONS: &str = "conversations";

/// Sled-backed conversation metadata store
#[derive(Clone)]
pub struct SledMetadataStore {
    db: Arc<Db>,
    conversations: Tree,
}

fn key(id: DocumentId) -> [u8; 8] {
    id.to_be_bytes()
}

impl SledMetadataStore {
    /// Open or create the metadata database
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.db_cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let conversations = db.open_tree(TREE_CONVERSATIONS)?;

        Ok(Self {
            db: Arc::new(db),
            conversations,
        })
    }

    /// Insert a new conversation row with a freshly allocated id
    pub fn create_conversation(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> StorageResult<Conversation> {
        // Ids start at 1
        let id = self.db.generate_id()? as DocumentId + 1;
        let mut conversation = Conversation::new(id, name);
        if let Some(description) = description {
            conversation = conversation.with_description(description);
        }

        let bytes = bincode::serialize(&conversation)?;
        self.conversations.insert(key(id), bytes)?;
        Ok(conversation)
    }

    /// Load a conversation row
    pub fn get_conversation(&self, id: DocumentId) -> StorageResult<Option<Conversation>> {
        match self.conversations.get(key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All conversations, most recently modified first
    pub fn list_conversations(&self) -> StorageResult<Vec<Conversation>> {
        let mut conversations = Vec::new();
        for item in self.conversations.iter() {
            let (_, value) = item?;
            conversations.push(bincode::deserialize::<Conversation>(&value)?);
        }
        conversations.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then(a.id.cmp(&b.id)));
        Ok(conversations)
    }

    /// Change the name and/or description of a conversation
    pub fn update_conversation(
        &self,
        id: DocumentId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> StorageResult<Conversation> {
        self.modify(id, |conversation| {
            if let Some(name) = name {
                conversation.name = name.to_string();
            }
            if let Some(description) = description {
                conversation.description = Some(description.to_string());
            }
        })?
        .ok_or(StorageError::NotFound(id))
    }

    /// Remove a conversation row
    pub fn delete_conversation(&self, id: DocumentId) -> StorageResult<()> {
        match self.conversations.remove(key(id))? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(id)),
        }
    }

    /// Atomically rewrite a row. `Ok(None)` when the row does not exist.
    fn modify<F>(&self, id: DocumentId, mut f: F) -> StorageResult<Option<Conversation>>
    where
        F: FnMut(&mut Conversation),
    {
        let mut corrupt = false;
        let updated = self.conversations.update_and_fetch(key(id), |old| {
            let bytes = old?;
            let rewritten = bincode::deserialize::<Conversation>(bytes)
                .ok()
                .and_then(|mut conversation| {
                    f(&mut conversation);
                    bincode::serialize(&conversation).ok()
                });
            match rewritten {
                Some(new_bytes) => Some(new_bytes),
                None => {
                    // Leave an unreadable row as it is
                    corrupt = true;
                    Some(bytes.to_vec())
                }
            }
        })?;

        if corrupt {
            return Err(StorageError::Corruption(id));
        }
        match updated {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Number of conversation rows
    pub fn len(&self) -> usize {
        self.conversations.len()
    }
}

impl MetadataStore for SledMetadataStore {
    fn touch_conversation(&self, id: DocumentId) -> StorageResult<()> {
        let now = chrono::Utc::now().timestamp();
        if self.modify(id, |conversation| conversation.last_modified = now)?.is_none() {
            debug!("Touch for unknown conversation {}", id);
        }
        Ok(())
    }
}

impl Drop for SledMetadataStore {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.flush();
    }
}
