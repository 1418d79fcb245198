//! Mini-game controllers.
//!
//! The session does not decide completion itself. It looks the active mode
//! up in a [`GameRegistry`] and asks the [`MiniGame`] found there whether the
//! round is solved, how to reset it, and which message carries the
//! completion time.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use rand::seq::SliceRandom;

use crate::protocol::{ClientMessage, GameMode, Submission};

/// Number of differences hidden in the spot-the-difference images.
pub const DIFFERENCE_COUNT: usize = 5;

/// Number of pieces in the image-scramble grid (3x3).
pub const SCRAMBLE_PIECES: u8 = 9;

/// Number of distinct faces on the matching-pairs table.
pub const PAIR_FACES: u8 = 3;

/// Number of cards on the matching-pairs table (two per face).
pub const PAIR_CARDS: usize = PAIR_FACES as usize * 2;

/// Per-round progress shared by all mini-games.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    /// Spot-the-difference indices found so far.
    pub found_differences: BTreeSet<usize>,
    /// Image-scramble piece at each grid slot (1-based piece numbers).
    pub scramble_order: Vec<u8>,
    /// Matching-pairs card positions already matched.
    pub matched_cards: BTreeSet<usize>,
    /// Matching-pairs face at each card position. Equal faces form a pair.
    pub card_faces: Vec<u8>,
}

impl RoundState {
    /// Swap two slots of the scramble grid.
    ///
    /// Returns `false` (and changes nothing) if either slot is out of range.
    pub fn swap_pieces(&mut self, a: usize, b: usize) -> bool {
        let len = self.scramble_order.len();
        if a >= len || b >= len {
            return false;
        }
        self.scramble_order.swap(a, b);
        true
    }
}

/// Completion contract of one mini-game.
pub trait MiniGame: fmt::Debug + Send + Sync {
    /// The mode this controller handles.
    fn mode(&self) -> GameMode;

    /// Whether `round` represents a solved puzzle.
    fn is_solved(&self, round: &RoundState) -> bool;

    /// Clear all round progress.
    fn reset(&self, round: &mut RoundState) {
        *round = RoundState::default();
    }

    /// Prepare a round that has no server to deal the puzzle.
    fn seed_offline(&self, _round: &mut RoundState) {}

    /// Adopt a layout dealt by the server in `gameStateUpdate`.
    fn apply_layout(&self, _round: &mut RoundState, _layout: &[u8]) {}

    /// Message that reports a completion time to the server.
    fn completion_message(&self, submission: Submission) -> ClientMessage {
        ClientMessage::SubmitTime(submission)
    }
}

#[derive(Debug, Default)]
pub struct SpotTheDifference;

impl MiniGame for SpotTheDifference {
    fn mode(&self) -> GameMode {
        GameMode::SpotTheDifference
    }

    fn is_solved(&self, round: &RoundState) -> bool {
        (0..DIFFERENCE_COUNT).all(|i| round.found_differences.contains(&i))
    }
}

#[derive(Debug, Default)]
pub struct ImageScramble;

impl ImageScramble {
    fn solved_order() -> Vec<u8> {
        (1..=SCRAMBLE_PIECES).collect()
    }
}

impl MiniGame for ImageScramble {
    fn mode(&self) -> GameMode {
        GameMode::ImageScramble
    }

    fn is_solved(&self, round: &RoundState) -> bool {
        // An empty grid means the pieces have not been dealt yet.
        !round.scramble_order.is_empty() && round.scramble_order == Self::solved_order()
    }

    fn seed_offline(&self, round: &mut RoundState) {
        let solved = Self::solved_order();
        let mut order = solved.clone();
        let mut rng = rand::thread_rng();
        while order == solved {
            order.shuffle(&mut rng);
        }
        round.scramble_order = order;
    }

    fn apply_layout(&self, round: &mut RoundState, layout: &[u8]) {
        round.scramble_order = layout.to_vec();
    }

    fn completion_message(&self, submission: Submission) -> ClientMessage {
        ClientMessage::SubmitScrambleTime(submission)
    }
}

#[derive(Debug, Default)]
pub struct MatchingPairs;

impl MiniGame for MatchingPairs {
    fn mode(&self) -> GameMode {
        GameMode::MatchingPairs
    }

    fn is_solved(&self, round: &RoundState) -> bool {
        round.matched_cards.len() >= PAIR_CARDS
    }

    /// Every round starts with a freshly shuffled table. A server layout,
    /// when one arrives, replaces it.
    fn reset(&self, round: &mut RoundState) {
        let mut faces: Vec<u8> = (1..=PAIR_FACES).flat_map(|face| [face, face]).collect();
        faces.shuffle(&mut rand::thread_rng());
        *round = RoundState {
            card_faces: faces,
            ..RoundState::default()
        };
    }

    fn apply_layout(&self, round: &mut RoundState, layout: &[u8]) {
        if layout.len() == PAIR_CARDS {
            round.card_faces = layout.to_vec();
        }
    }
}

/// Dispatch table from game mode to controller.
#[derive(Debug)]
pub struct GameRegistry {
    games: HashMap<GameMode, Box<dyn MiniGame>>,
}

impl GameRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            games: HashMap::new(),
        }
    }

    /// Register (or replace) the controller for its mode.
    pub fn register(&mut self, game: Box<dyn MiniGame>) {
        self.games.insert(game.mode(), game);
    }

    pub fn get(&self, mode: GameMode) -> Option<&dyn MiniGame> {
        self.games.get(&mode).map(|g| g.as_ref())
    }
}

impl Default for GameRegistry {
    /// Registry holding the three built-in mini-games.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(SpotTheDifference));
        registry.register(Box::new(ImageScramble));
        registry.register(Box::new(MatchingPairs));
        registry
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::UserId;

    fn submission() -> Submission {
        Submission {
            team_name: "Owls".into(),
            section: "B".into(),
            user_id: UserId::new("u-1"),
            event_code: "1234".into(),
            time: 12_345,
        }
    }

    #[test]
    fn default_registry_covers_every_mode() {
        let registry = GameRegistry::default();
        for mode in GameMode::ALL {
            assert_eq!(registry.get(mode).unwrap().mode(), mode);
        }
    }

    #[test]
    fn spot_the_difference_needs_all_five() {
        let game = SpotTheDifference;
        let mut round = RoundState::default();
        for i in 0..DIFFERENCE_COUNT - 1 {
            round.found_differences.insert(i);
            assert!(!game.is_solved(&round));
        }
        round.found_differences.insert(DIFFERENCE_COUNT - 1);
        assert!(game.is_solved(&round));
    }

    #[test]
    fn scramble_is_solved_only_in_identity_order() {
        let game = ImageScramble;
        let mut round = RoundState::default();
        assert!(!game.is_solved(&round));

        round.scramble_order = vec![2, 1, 3, 4, 5, 6, 7, 8, 9];
        assert!(!game.is_solved(&round));
        assert!(round.swap_pieces(0, 1));
        assert!(game.is_solved(&round));
        assert!(!round.swap_pieces(0, 9));
    }

    #[test]
    fn offline_scramble_is_dealt_unsolved() {
        let game = ImageScramble;
        let mut round = RoundState::default();
        game.seed_offline(&mut round);

        let mut pieces = round.scramble_order.clone();
        pieces.sort_unstable();
        assert_eq!(pieces, (1..=SCRAMBLE_PIECES).collect::<Vec<_>>());
        assert!(!game.is_solved(&round));
    }

    #[test]
    fn matching_pairs_needs_every_card() {
        let game = MatchingPairs;
        let mut round = RoundState::default();
        round.matched_cards.extend([0, 1, 2, 3]);
        assert!(!game.is_solved(&round));
        round.matched_cards.extend([4, 5]);
        assert!(game.is_solved(&round));
    }

    #[test]
    fn matching_pairs_deals_two_of_each_face() {
        let game = MatchingPairs;
        let mut round = RoundState {
            matched_cards: [0, 1].into_iter().collect(),
            ..RoundState::default()
        };
        game.reset(&mut round);
        assert!(round.matched_cards.is_empty());

        let mut faces = round.card_faces.clone();
        faces.sort_unstable();
        assert_eq!(faces, [1, 1, 2, 2, 3, 3]);

        game.apply_layout(&mut round, &[3, 1, 2, 2, 1, 3]);
        assert_eq!(round.card_faces, [3, 1, 2, 2, 1, 3]);
        // A layout for some other table size is not ours.
        game.apply_layout(&mut round, &[1, 2, 3]);
        assert_eq!(round.card_faces, [3, 1, 2, 2, 1, 3]);
    }

    #[test]
    fn completion_message_depends_on_mode() {
        assert!(matches!(
            SpotTheDifference.completion_message(submission()),
            ClientMessage::SubmitTime(_)
        ));
        assert!(matches!(
            MatchingPairs.completion_message(submission()),
            ClientMessage::SubmitTime(_)
        ));
        assert!(matches!(
            ImageScramble.completion_message(submission()),
            ClientMessage::SubmitScrambleTime(_)
        ));
    }

    #[test]
    fn reset_clears_progress() {
        let mut round = RoundState {
            found_differences: [1, 2].into_iter().collect(),
            scramble_order: vec![3, 1, 2],
            matched_cards: [0, 1].into_iter().collect(),
            card_faces: vec![1, 1, 2, 2, 3, 3],
        };
        SpotTheDifference.reset(&mut round);
        assert_eq!(round, RoundState::default());
    }
}
