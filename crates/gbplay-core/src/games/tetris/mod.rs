//! Two-player Tetris over the link cable.
//!
//! # Flow of a session
//!
//! ```text
//! WaitingForPlayers ─► PlayersConnected ─► DifficultySelection ─► SendingInitializationData
//!                                               ▲                        ▲            │
//!                                               │ match over             │ next round ▼
//!                                               └──────────── RoundOver ◄─────── Playing
//! ```
//!
//! - **PlayersConnected**: master/slave handshake and music selection.
//! - **DifficultySelection**: the consoles are bridged until neither side
//!   has changed its difficulty for [`DIFFICULTY_QUIESCENCE`]; the game has
//!   no confirm button for this menu in two-player mode.
//! - **SendingInitializationData**: a fresh garbage board and piece queue go
//!   to both consoles, then the start sequence.
//! - **Playing**: the consoles are bridged tick by tick until both report
//!   ready-for-round-end; the latched win/lose bytes decide the round.
//! - **RoundOver**: after the results screen, either the next round starts
//!   or, once a player reaches the match-win threshold, a new match does.

mod handlers;

pub mod ctrl;
pub mod payload;
pub mod round;

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use ctrl::MusicType;
pub use round::{Player, RoundOutcome, RoundTracker};

use crate::session::{GameProtocol, HandlerTable};

/// Send spacing for menus and in-game bridging.
pub const MENU_PACING: Duration = Duration::from_millis(30);
/// Send spacing for the bulk payloads.
pub const DATA_PACING: Duration = Duration::ZERO;
/// How long the difficulty pair must stay unchanged before it is taken as
/// chosen.
pub const DIFFICULTY_QUIESCENCE: Duration = Duration::from_millis(5_000);
/// Delay before bridging starts; the game freezes if spoken to sooner.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Time the results screen is left up before moving on.
pub const ROUND_OVER_DELAY: Duration = Duration::from_millis(10_000);

/// Round wins needed to take a match.
pub const DEFAULT_WINS_PER_MATCH: u8 = 4;

/// States of a Tetris session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TetrisState {
    WaitingForPlayers,
    PlayersConnected,
    DifficultySelection,
    SendingInitializationData,
    Playing,
    RoundOver,
}

/// Per-server Tetris options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetrisSettings {
    /// Music confirmed on the music selection screen.
    pub music: MusicType,
    /// Round wins that end a match.
    pub wins_per_match: u8,
}

impl Default for TetrisSettings {
    fn default() -> Self {
        Self {
            music: MusicType::default(),
            wins_per_match: DEFAULT_WINS_PER_MATCH,
        }
    }
}

/// Score and round state of one Tetris session.
#[derive(Debug, Clone, Default)]
pub struct Tetris {
    settings: TetrisSettings,
    wins: [u8; 2],
    round: u32,
    last_outcome: Option<RoundOutcome>,
}

impl Tetris {
    pub fn new(settings: TetrisSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &TetrisSettings {
        &self.settings
    }

    /// Rounds `player` has won in the current match.
    pub fn wins(&self, player: Player) -> u8 {
        self.wins[player.index()]
    }

    /// Number of the round in progress within the current match (0 before
    /// the first one starts).
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn last_outcome(&self) -> Option<RoundOutcome> {
        self.last_outcome
    }

    /// `true` once either player has reached the match-win threshold.
    pub fn is_match_over(&self) -> bool {
        self.wins.iter().any(|&w| w >= self.settings.wins_per_match)
    }

    /// Clears per-round state ahead of a new round.
    pub fn begin_round(&mut self) {
        self.round += 1;
        self.last_outcome = None;
    }

    /// Credits the round winner, if any.
    pub fn record(&mut self, outcome: RoundOutcome) {
        if let RoundOutcome::Winner(player) = outcome {
            let wins = &mut self.wins[player.index()];
            *wins = wins.saturating_add(1);
        }
        self.last_outcome = Some(outcome);
        info!(
            "round {} ended: {:?} (score {}-{})",
            self.round, outcome, self.wins[0], self.wins[1]
        );
    }
}

impl GameProtocol for Tetris {
    type State = TetrisState;
    const NAME: &'static str = "Tetris";

    fn initial_state(&self) -> TetrisState {
        TetrisState::WaitingForPlayers
    }

    fn handlers() -> &'static HandlerTable<Self> {
        static HANDLERS: OnceLock<HandlerTable<Tetris>> = OnceLock::new();
        HANDLERS.get_or_init(|| {
            HandlerTable::new()
                .with(TetrisState::WaitingForPlayers, handlers::waiting_for_players)
                .with(TetrisState::PlayersConnected, handlers::players_connected)
                .with(TetrisState::DifficultySelection, handlers::difficulty_selection)
                .with(
                    TetrisState::SendingInitializationData,
                    handlers::sending_initialization_data,
                )
                .with(TetrisState::Playing, handlers::playing)
                .with(TetrisState::RoundOver, handlers::round_over)
        })
    }

    fn reset(&mut self) {
        self.wins = [0; 2];
        self.round = 0;
        self.last_outcome = None;
    }
}
