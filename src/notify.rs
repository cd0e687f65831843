//! Avisos al canal de texto vinculado.
//!
//! El orquestador habla con el canal por este trait. Los envíos son best
//! effort: una falla de la API se loguea con contexto y no corta la
//! operación que la disparó.

use async_trait::async_trait;
use serenity::builder::{CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use std::sync::Arc;
use tracing::warn;

/// Referencia a un mensaje enviado, para poder editarlo después.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: MessageId,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Envía un aviso. Devuelve `None` si el envío falló.
    async fn send(&self, channel: ChannelId, text: &str) -> Option<MessageRef>;

    /// Edita un aviso previo en el lugar.
    async fn edit(&self, target: &MessageRef, text: &str);

    /// Borra un mensaje del canal (por ejemplo el link que disparó la
    /// ruta pasiva, una vez encolado).
    async fn delete(&self, channel: ChannelId, message: MessageId);
}

pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Arc<Self> {
        Arc::new(Self { http })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, channel: ChannelId, text: &str) -> Option<MessageRef> {
        match channel
            .send_message(&self.http, CreateMessage::new().content(text))
            .await
        {
            Ok(message) => Some(MessageRef {
                channel,
                message: message.id,
            }),
            Err(e) => {
                warn!("⚠️ No pude avisar en el canal {}: {}", channel, e);
                None
            }
        }
    }

    async fn edit(&self, target: &MessageRef, text: &str) {
        if let Err(e) = target
            .channel
            .edit_message(
                &self.http,
                target.message,
                EditMessage::new().content(text),
            )
            .await
        {
            warn!(
                "⚠️ No pude editar el mensaje {} en {}: {}",
                target.message, target.channel, e
            );
        }
    }

    async fn delete(&self, channel: ChannelId, message: MessageId) {
        if let Err(e) = channel.delete_message(&self.http, message).await {
            warn!("⚠️ No pude borrar el mensaje {} en {}: {}", message, channel, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Notificador grabador: acumula todo lo enviado, editado y borrado.
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(ChannelId, String)>>,
        pub edits: Mutex<Vec<(MessageRef, String)>>,
        pub deletes: Mutex<Vec<(ChannelId, MessageId)>>,
        next_id: Mutex<u64>,
    }

    impl RecordingNotifier {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                edits: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
                next_id: Mutex::new(1),
            })
        }

        pub fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, t)| t.clone()).collect()
        }

        pub fn saw(&self, fragment: &str) -> bool {
            self.sent_texts().iter().any(|t| t.contains(fragment))
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, channel: ChannelId, text: &str) -> Option<MessageRef> {
            self.sent.lock().push((channel, text.to_string()));
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            Some(MessageRef {
                channel,
                message: MessageId::new(id),
            })
        }

        async fn edit(&self, target: &MessageRef, text: &str) {
            self.edits.lock().push((*target, text.to_string()));
        }

        async fn delete(&self, channel: ChannelId, message: MessageId) {
            self.deletes.lock().push((channel, message));
        }
    }
}
