//! Cola FIFO de reproducción pendiente, una por guild.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::sources::{MediaInfo, SourceKind};

/// Elemento encolado: o un descriptor ya resuelto, o un id que se vuelve a
/// resolver al salir de la cola. Los videos se encolan diferidos porque sus
/// URLs de audio expiran; dentro del TTL la re-resolución es un hit de cache.
#[derive(Debug, Clone)]
pub enum QueueEntry {
    Resolved(MediaInfo),
    Deferred { id: String, kind: SourceKind },
}

impl QueueEntry {
    /// Forma de encolado natural para un descriptor según su clase.
    pub fn for_media(media: MediaInfo) -> Self {
        match media.kind {
            SourceKind::Video => QueueEntry::Deferred {
                id: media.source_id,
                kind: SourceKind::Video,
            },
            _ => QueueEntry::Resolved(media),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub entry: QueueEntry,
    pub added_at: DateTime<Utc>,
}

impl QueuedItem {
    pub fn new(entry: QueueEntry) -> Self {
        Self {
            entry,
            added_at: Utc::now(),
        }
    }
}

/// Cola de una guild. Mutex corto: solo se sostiene para tocar el VecDeque.
#[derive(Default)]
pub struct PendingQueue {
    items: Mutex<VecDeque<QueuedItem>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: QueueEntry) {
        self.items.lock().push_back(QueuedItem::new(entry));
    }

    /// Saca el próximo elemento en orden de llegada.
    pub fn shift(&self) -> Option<QueuedItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Vacía la cola y devuelve cuántos elementos había.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }
}

/// Colas por guild, creadas a demanda.
pub struct QueueRegistry {
    queues: DashMap<GuildId, Arc<PendingQueue>>,
}

impl QueueRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: DashMap::new(),
        })
    }

    pub fn for_guild(&self, guild: GuildId) -> Arc<PendingQueue> {
        self.queues
            .entry(guild)
            .or_insert_with(|| Arc::new(PendingQueue::new()))
            .clone()
    }

    /// Descarta la cola de la guild junto con la sesión.
    pub fn remove(&self, guild: GuildId) {
        if let Some((_, queue)) = self.queues.remove(&guild) {
            let dropped = queue.clear();
            if dropped > 0 {
                debug!("🧹 Cola de guild {} descartada con {} elementos", guild, dropped);
            }
        }
    }
}
