//! Time-ascending leaderboard projection.
//!
//! Online, the server's `leaderboardUpdate` broadcast always wins and is
//! applied with [`Leaderboard::replace`]. Offline, completions accumulate
//! locally through [`Leaderboard::submit`]. Both keep the rows sorted by
//! time; ties keep arrival order.

use crate::protocol::LeaderboardEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a locally produced entry.
    pub fn submit(&mut self, entry: LeaderboardEntry) {
        self.entries.push(entry);
        self.sort();
    }

    /// Replace every row with an authoritative payload.
    pub fn replace(&mut self, entries: Vec<LeaderboardEntry>) {
        self.entries = entries;
        self.sort();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Rows in rank order.
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 1-based rank of the first row matching `name` and `section`.
    pub fn rank_of(&self, name: &str, section: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.section == section)
            .map(|i| i + 1)
    }

    // `sort_by_key` is stable, which is what keeps ties in arrival order.
    fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.time);
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

    fn names(board: &Leaderboard) -> Vec<&str> {
        board.entries().iter().map(|e| e.name.as_str()).collect()
    }

    fn is_sorted(board: &Leaderboard) -> bool {
        board.entries().windows(2).all(|w| w[0].time <= w[1].time)
    }

    #[test]
    fn submit_inserts_in_time_order() {
        let mut board = Leaderboard::new();
        board.submit(LeaderboardEntry::new("A", "1", 10_000));
        board.submit(LeaderboardEntry::new("B", "1", 15_000));
        board.submit(LeaderboardEntry::new("C", "2", 12_345));

        assert_eq!(names(&board), ["A", "C", "B"]);
        assert_eq!(board.rank_of("C", "2"), Some(2));
    }

    #[test]
    fn replace_sorts_server_payload() {
        let mut board = Leaderboard::new();
        board.submit(LeaderboardEntry::new("stale", "x", 1));
        board.replace(vec![
            LeaderboardEntry::new("slow", "1", 30_000),
            LeaderboardEntry::new("fast", "1", 9_000),
        ]);
        assert_eq!(names(&board), ["fast", "slow"]);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let mut board = Leaderboard::new();
        board.submit(LeaderboardEntry::new("first", "1", 5_000));
        board.submit(LeaderboardEntry::new("second", "1", 5_000));
        board.submit(LeaderboardEntry::new("quick", "1", 1_000));
        assert_eq!(names(&board), ["quick", "first", "second"]);

        board.replace(vec![
            LeaderboardEntry::new("x", "1", 7),
            LeaderboardEntry::new("y", "1", 7),
            LeaderboardEntry::new("z", "1", 3),
        ]);
        assert_eq!(names(&board), ["z", "x", "y"]);
    }

    #[test]
    fn sorted_for_every_submission_order() {
        let times = [40_u64, 10, 30, 20];
        // All rotations and their reversals.
        for shift in 0..times.len() {
            let mut order: Vec<u64> = times.iter().cycle().skip(shift).take(4).copied().collect();
            for _ in 0..2 {
                let mut board = Leaderboard::new();
                for (i, t) in order.iter().enumerate() {
                    board.submit(LeaderboardEntry::new(format!("t{i}"), "s", *t));
                    assert!(is_sorted(&board));
                }
                let mut replaced = Leaderboard::new();
                replaced.replace(
                    order
                        .iter()
                        .map(|t| LeaderboardEntry::new("r", "s", *t))
                        .collect(),
                );
                assert!(is_sorted(&replaced));
                order.reverse();
            }
        }
    }

    #[test]
    fn rank_of_unknown_team_is_none() {
        let board = Leaderboard::new();
        assert!(board.is_empty());
        assert_eq!(board.rank_of("ghost", "0"), None);
    }
}
