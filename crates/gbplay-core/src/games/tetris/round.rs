//! Round bookkeeping while the two consoles are bridged in game.

use super::ctrl::{self, LOSE, POLL, READY_FOR_ROUND_END, WIN};

/// A seat at the link cable, in join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Player {
    One,
    Two,
}

impl Player {
    pub fn index(self) -> usize {
        match self {
            Player::One => 0,
            Player::Two => 1,
        }
    }
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Both consoles latched the same terminal byte (or none at all).
    /// `shared` is echoed back while polling for round end.
    Draw { shared: u8 },
    Winner(Player),
}

impl RoundOutcome {
    /// Byte used to poll both consoles for round-end readiness.
    pub fn poll_byte(self) -> u8 {
        match self {
            RoundOutcome::Draw { shared } => shared,
            RoundOutcome::Winner(_) => POLL,
        }
    }
}

/// Watches the bridged traffic for the end of a round.
///
/// Each console's first terminal byte ([`WIN`] or [`LOSE`]) is latched and
/// kept even if that console keeps sending other bytes; the round is over
/// once both consoles send [`READY_FOR_ROUND_END`] in the same tick.
#[derive(Debug, Default)]
pub struct RoundTracker {
    latched: [Option<u8>; 2],
    round_over: bool,
}

impl RoundTracker {
    /// Feeds one bridged tick: `first` is player one's byte, `second`
    /// player two's.
    pub fn observe(&mut self, first: u8, second: u8) {
        for (slot, byte) in self.latched.iter_mut().zip([first, second]) {
            if slot.is_none() && ctrl::is_terminal(byte) {
                *slot = Some(byte);
            }
        }
        if first == READY_FOR_ROUND_END && second == READY_FOR_ROUND_END {
            self.round_over = true;
        }
    }

    pub fn is_round_over(&self) -> bool {
        self.round_over
    }

    /// The terminal byte latched for `player`, if any.
    pub fn latched(&self, player: Player) -> Option<u8> {
        self.latched[player.index()]
    }

    /// Decides the round from the latched bytes.  A console that never sent
    /// a terminal byte counts as having sent 0.
    pub fn outcome(&self) -> RoundOutcome {
        let [first, second] = self.latched.map(|b| b.unwrap_or(0));
        if first == second {
            RoundOutcome::Draw { shared: first }
        } else if first == WIN || second == LOSE {
            RoundOutcome::Winner(Player::One)
        } else {
            RoundOutcome::Winner(Player::Two)
        }
    }
}
