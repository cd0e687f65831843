//! Votación de skip y de limpieza de cola.
//!
//! Cada acción lleva su propio conjunto de votantes y su propia fórmula de
//! quórum. Las dos fórmulas difieren a propósito en el denominador: skip
//! cuenta a todos los oyentes elegibles y clear descuenta uno. Los conjuntos
//! solo se mutan dentro del actor serializado de la guild.

use serenity::model::id::UserId;
use std::collections::HashSet;

/// Fracción de oyentes elegibles que ejecuta la acción.
pub const VOTE_RATIO: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Skip,
    Clear,
}

impl std::fmt::Display for VoteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteAction::Skip => write!(f, "saltar"),
            VoteAction::Clear => write!(f, "limpiar la cola"),
        }
    }
}

/// Quórum de skip: votantes sobre el total de oyentes elegibles.
pub fn skip_quorum_reached(voters: usize, eligible: usize) -> bool {
    voters as f32 / eligible.max(1) as f32 >= VOTE_RATIO
}

/// Quórum de clear: votantes sobre los oyentes elegibles menos uno.
pub fn clear_quorum_reached(voters: usize, eligible: usize) -> bool {
    voters as f32 / eligible.saturating_sub(1).max(1) as f32 >= VOTE_RATIO
}

/// Resultado de registrar un voto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Quórum alcanzado: la acción se ejecuta y el conjunto se vacía.
    Executed,
    /// Voto contado, faltan más.
    Pending { votes: usize, needed: usize },
    /// El votante ya había votado esta acción.
    AlreadyVoted,
}

/// Conjuntos de votantes de la sesión.
#[derive(Debug, Default)]
pub struct VoteLedger {
    skip: HashSet<UserId>,
    clear: HashSet<UserId>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un voto y evalúa el quórum con la cantidad de oyentes
    /// elegibles del momento. Un voto duplicado no cuenta dos veces.
    pub fn register(&mut self, action: VoteAction, voter: UserId, eligible: usize) -> VoteOutcome {
        let set = match action {
            VoteAction::Skip => &mut self.skip,
            VoteAction::Clear => &mut self.clear,
        };
        if !set.insert(voter) {
            return VoteOutcome::AlreadyVoted;
        }

        let reached = match action {
            VoteAction::Skip => skip_quorum_reached(set.len(), eligible),
            VoteAction::Clear => clear_quorum_reached(set.len(), eligible),
        };
        if reached {
            set.clear();
            VoteOutcome::Executed
        } else {
            VoteOutcome::Pending {
                votes: set.len(),
                needed: votes_needed(action, eligible),
            }
        }
    }

    /// Vacía los dos conjuntos. Se llama en cada cambio de pista.
    pub fn reset(&mut self) {
        self.skip.clear();
        self.clear.clear();
    }

    pub fn skip_votes(&self) -> usize {
        self.skip.len()
    }

    pub fn clear_votes(&self) -> usize {
        self.clear.len()
    }
}

/// Mínimo de votos que alcanza el quórum de la acción.
pub fn votes_needed(action: VoteAction, eligible: usize) -> usize {
    let denominator = match action {
        VoteAction::Skip => eligible.max(1),
        VoteAction::Clear => eligible.saturating_sub(1).max(1),
    };
    ((VOTE_RATIO * denominator as f32).ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ANA: UserId = UserId::new(11);
    const BETO: UserId = UserId::new(22);

    #[test]
    fn test_skip_with_three_listeners_needs_two_votes() {
        let mut ledger = VoteLedger::new();

        assert_eq!(
            ledger.register(VoteAction::Skip, ANA, 3),
            VoteOutcome::Pending { votes: 1, needed: 2 }
        );
        assert_eq!(
            ledger.register(VoteAction::Skip, ANA, 3),
            VoteOutcome::AlreadyVoted
        );
        assert_eq!(
            ledger.register(VoteAction::Skip, BETO, 3),
            VoteOutcome::Executed
        );
        // Ejecutar vació el conjunto: una nueva ronda arranca de cero.
        assert_eq!(ledger.skip_votes(), 0);
    }

    #[test]
    fn test_clear_denominator_discounts_one_listener() {
        // Con 3 elegibles: 1/(3-1) = 0.5 alcanza, mientras que para skip
        // ese mismo voto es 1/3 y no alcanza.
        let mut ledger = VoteLedger::new();
        assert_eq!(
            ledger.register(VoteAction::Clear, ANA, 3),
            VoteOutcome::Executed
        );
        assert_eq!(
            ledger.register(VoteAction::Skip, ANA, 3),
            VoteOutcome::Pending { votes: 1, needed: 2 }
        );
    }

    #[test]
    fn test_skip_quorum_boundary_is_inclusive() {
        // 2/5 = 0.4 exacto alcanza el quórum.
        assert!(skip_quorum_reached(2, 5));
        assert!(!skip_quorum_reached(1, 5));
        assert_eq!(votes_needed(VoteAction::Skip, 5), 2);
    }

    #[test]
    fn test_single_listener_edge() {
        assert!(skip_quorum_reached(1, 1));
        assert!(clear_quorum_reached(1, 1));
        assert!(clear_quorum_reached(1, 0));
    }

    #[test]
    fn test_reset_drops_both_sets() {
        let mut ledger = VoteLedger::new();
        ledger.register(VoteAction::Skip, ANA, 10);
        ledger.register(VoteAction::Clear, ANA, 10);
        assert_eq!(ledger.skip_votes(), 1);
        assert_eq!(ledger.clear_votes(), 1);

        ledger.reset();
        assert_eq!(ledger.skip_votes(), 0);
        assert_eq!(ledger.clear_votes(), 0);
    }

    #[test]
    fn test_actions_do_not_share_votes() {
        let mut ledger = VoteLedger::new();
        ledger.register(VoteAction::Skip, ANA, 10);
        // El mismo usuario puede votar la otra acción.
        assert_ne!(
            ledger.register(VoteAction::Clear, ANA, 10),
            VoteOutcome::AlreadyVoted
        );
    }
}
