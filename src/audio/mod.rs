//! # Audio
//!
//! Estado de reproducción por guild y sus transiciones.
//!
//! ## Componentes
//!
//! ### [`session`] - Sesiones
//! - Vinculación guild ↔ canal de texto y registro de sesiones vivas
//! - Estado serializado por un mutex por guild
//! - Generación de reproducción para descartar eventos viejos
//!
//! ### [`player`] - Controlador
//! - Driver por sesión que consume eventos del transporte en orden
//! - Transiciones: arranque, fin, error con rearranque acotado, desconexión
//!
//! ### [`queue`] - Cola pendiente
//! - Entradas resueltas o diferidas (los videos se re-resuelven al salir)
//!
//! ### [`votes`] - Votación
//! - Quórum del 40 % para saltar o limpiar la cola
//!
//! ### [`playlist`] - Expansión de playlists

pub mod player;
pub mod playlist;
pub mod queue;
pub mod session;
pub mod votes;

pub use player::PlaybackController;
pub use playlist::PlaylistExpander;
pub use queue::QueueRegistry;
pub use session::{volume_factor, Bound, PlaybackState, SessionRegistry};
pub use votes::{VoteAction, VoteOutcome};
