//! Expansión de playlists en la cola de la guild.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{MusicError, MusicResult};
use crate::sources::AudioResolver;

/// Resultado de expandir una playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    /// Primer elemento que entró a la cola.
    pub first: String,
    /// Elementos encolados de verdad.
    pub enqueued: usize,
    /// Tamaño que reporta la plataforma, que puede exceder la página.
    pub total: u64,
}

pub struct PlaylistExpander {
    resolver: Arc<AudioResolver>,
}

impl PlaylistExpander {
    pub fn new(resolver: Arc<AudioResolver>) -> Self {
        Self { resolver }
    }

    /// Trae la página de la playlist y encola sus elementos en orden con el
    /// callback. Los elementos que el callback rechaza se saltan con aviso;
    /// si ninguno entra, la expansión falla con [`MusicError::EmptyPlaylist`].
    pub async fn expand<'a, F>(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
        mut enqueue: F,
    ) -> MusicResult<Expanded>
    where
        F: FnMut(String) -> BoxFuture<'a, MusicResult<()>>,
    {
        let page = self.resolver.resolve_playlist(playlist_id, cancel).await?;
        let mut first = None;
        let mut enqueued = 0usize;
        for id in page.items {
            match enqueue(id.clone()).await {
                Ok(()) => {
                    enqueued += 1;
                    if first.is_none() {
                        first = Some(id);
                    }
                }
                Err(e) => {
                    warn!("⚠️ Playlist {}: «{}» se saltó: {}", page.id, id, e);
                }
            }
        }
        let Some(first) = first else {
            return Err(MusicError::EmptyPlaylist);
        };
        info!(
            "📃 Playlist {}: {} de {} elementos encolados",
            page.id, enqueued, page.total
        );
        Ok(Expanded { first, enqueued, total: page.total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MediaCache, PlaylistCache};
    use crate::config::Config;
    use crate::sources::{
        MockMetadataProvider, MockPlaylistProvider, MockSearchProvider, MockTrackSearchProvider,
        PlaylistPage,
    };
    use crate::storage::AudioStore;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    async fn expander_with(playlists: MockPlaylistProvider) -> PlaylistExpander {
        let dir = std::env::temp_dir().join(format!(
            "cadenza-playlist-{}-{:p}",
            std::process::id(),
            &playlists as *const _
        ));
        let store = Arc::new(AudioStore::new(&dir).await.unwrap());
        let resolver = Arc::new(AudioResolver::new(
            &Config::default(),
            Arc::new(MockMetadataProvider::new()),
            Arc::new(MockSearchProvider::new()),
            Arc::new(playlists),
            Arc::new(MockTrackSearchProvider::new()),
            MediaCache::new(),
            PlaylistCache::new(),
            store,
        ));
        PlaylistExpander::new(resolver)
    }

    fn page(items: &[&str]) -> PlaylistPage {
        PlaylistPage {
            id: "PLprueba".to_string(),
            total: items.len() as u64,
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn encola_todos_los_elementos_en_orden() {
        let mut playlists = MockPlaylistProvider::new();
        playlists
            .expect_fetch_playlist()
            .times(1)
            .returning(|_| Ok(page(&["uno", "dos", "tres"])));
        let expander = expander_with(playlists).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let expanded = expander
            .expand("PLprueba", &CancellationToken::new(), |id| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(id);
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(seen.lock().clone(), vec!["uno", "dos", "tres"]);
        assert_eq!(expanded.first, "uno");
        assert_eq!(expanded.enqueued, 3);
        assert_eq!(expanded.total, 3);
    }

    #[tokio::test]
    async fn los_elementos_rechazados_se_saltan() {
        let mut playlists = MockPlaylistProvider::new();
        playlists
            .expect_fetch_playlist()
            .times(1)
            .returning(|_| Ok(page(&["uno", "dos", "tres"])));
        let expander = expander_with(playlists).await;

        let expanded = expander
            .expand("PLprueba", &CancellationToken::new(), |id| {
                async move {
                    if id == "uno" {
                        Err(MusicError::NoVideoFound)
                    } else {
                        Ok(())
                    }
                }
                .boxed()
            })
            .await
            .unwrap();

        // El primero de verdad es el primero que entró, no el primero listado.
        assert_eq!(expanded.first, "dos");
        assert_eq!(expanded.enqueued, 2);
    }

    #[tokio::test]
    async fn sin_elementos_encolados_es_playlist_vacia() {
        let mut playlists = MockPlaylistProvider::new();
        playlists
            .expect_fetch_playlist()
            .times(1)
            .returning(|_| Ok(page(&["uno"])));
        let expander = expander_with(playlists).await;

        let result = expander
            .expand("PLprueba", &CancellationToken::new(), |_| {
                async { Err(MusicError::NoVideoFound) }.boxed()
            })
            .await;

        assert!(matches!(result, Err(MusicError::EmptyPlaylist)));
    }

    #[tokio::test]
    async fn la_pagina_vacia_del_proveedor_se_propaga() {
        let mut playlists = MockPlaylistProvider::new();
        playlists
            .expect_fetch_playlist()
            .times(1)
            .returning(|_| Err(MusicError::EmptyPlaylist));
        let expander = expander_with(playlists).await;

        let result = expander
            .expand("PLvacia", &CancellationToken::new(), |_| {
                async { Ok(()) }.boxed()
            })
            .await;

        assert!(matches!(result, Err(MusicError::EmptyPlaylist)));
    }
}
