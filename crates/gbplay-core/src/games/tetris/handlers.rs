//! One async handler per [`TetrisState`].

use tokio::time::{self, Instant};
use tracing::{debug, info};

use super::ctrl::{
    BEGIN_ROUND_OVER_SCREEN, CONFIRM_MENU, CONFIRM_MUSIC, END_ROUND_OVER_SCREEN, MASTER, POLL,
    READY_FOR_MUSIC, READY_FOR_RESTART, READY_FOR_ROUND_END, SLAVE, START_SEQUENCE,
};
use super::round::RoundTracker;
use super::{
    payload, Tetris, TetrisState, DATA_PACING, DIFFICULTY_QUIESCENCE, MENU_PACING,
    ROUND_OVER_DELAY, SETTLE_DELAY,
};
use crate::session::{GameProtocol, HandlerFuture, Session, MAX_PEERS};

pub(super) fn waiting_for_players(session: &mut Session<Tetris>) -> HandlerFuture<'_> {
    Box::pin(async move {
        session.wait_for_peers(MAX_PEERS).await?;
        session.set_state(TetrisState::PlayersConnected);
        Ok(())
    })
}

pub(super) fn players_connected(session: &mut Session<Tetris>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let music = session.protocol().settings().music.byte();

        session
            .for_all_peers(|peer| async move {
                peer.set_pacing(MENU_PACING);
                peer.wait_for_byte(MASTER, SLAVE).await?;
                peer.wait_for_byte(music, READY_FOR_MUSIC).await?;
                peer.exchange_byte(CONFIRM_MUSIC).await
            })
            .await?;

        session.set_state(TetrisState::DifficultySelection);
        Ok(())
    })
}

pub(super) fn difficulty_selection(session: &mut Session<Tetris>) -> HandlerFuture<'_> {
    Box::pin(async move {
        // Every pass through here is a new match.
        session.protocol_mut().reset();

        let (first, second) = session.linked_pair()?;
        let mut difficulties = (0u8, 0u8);
        let mut last_change = Instant::now();

        while last_change.elapsed() < DIFFICULTY_QUIESCENCE {
            first
                .forward_with(&second, |ours, theirs| {
                    if (ours, theirs) != difficulties {
                        difficulties = (ours, theirs);
                        last_change = Instant::now();
                    }
                })
                .await?;
        }
        debug!(
            "session '{}': difficulties settled at {:#04x}/{:#04x}",
            session.id(),
            difficulties.0,
            difficulties.1
        );

        session
            .for_all_peers(|peer| async move { peer.wait_for_byte(CONFIRM_MENU, SLAVE).await })
            .await?;

        session.set_state(TetrisState::SendingInitializationData);
        Ok(())
    })
}

pub(super) fn sending_initialization_data(session: &mut Session<Tetris>) -> HandlerFuture<'_> {
    Box::pin(async move {
        session.protocol_mut().begin_round();
        info!(
            "session '{}': starting round {}",
            session.id(),
            session.protocol().round()
        );

        let (garbage, pieces) = {
            let mut rng = rand::thread_rng();
            (payload::garbage_board(&mut rng), payload::piece_sequence(&mut rng))
        };
        let (garbage, pieces) = (garbage.as_slice(), pieces.as_slice());

        session
            .for_all_peers(|peer| async move {
                peer.set_pacing(DATA_PACING);
                peer.wait_for_byte(MASTER, SLAVE).await?;
                peer.send_sequence(garbage).await?;
                peer.wait_for_byte(MASTER, SLAVE).await?;
                peer.send_sequence(pieces).await
            })
            .await?;

        session
            .for_all_peers(|peer| async move {
                peer.set_pacing(MENU_PACING);
                peer.send_sequence(&START_SEQUENCE).await
            })
            .await?;

        session.set_state(TetrisState::Playing);
        Ok(())
    })
}

pub(super) fn playing(session: &mut Session<Tetris>) -> HandlerFuture<'_> {
    Box::pin(async move {
        time::sleep(SETTLE_DELAY).await;

        let (first, second) = session.linked_pair()?;
        let mut tracker = RoundTracker::default();
        while !tracker.is_round_over() {
            first
                .forward_with(&second, |ours, theirs| tracker.observe(ours, theirs))
                .await?;
        }

        let outcome = tracker.outcome();
        session.protocol_mut().record(outcome);
        let poll = outcome.poll_byte();

        session
            .for_all_peers(|peer| async move {
                peer.wait_for_byte(poll, READY_FOR_ROUND_END).await?;
                peer.exchange_byte(BEGIN_ROUND_OVER_SCREEN).await
            })
            .await?;

        session.set_state(TetrisState::RoundOver);
        Ok(())
    })
}

pub(super) fn round_over(session: &mut Session<Tetris>) -> HandlerFuture<'_> {
    Box::pin(async move {
        time::sleep(ROUND_OVER_DELAY).await;

        let (expected, next) = if session.protocol().is_match_over() {
            info!("session '{}': match over", session.id());
            (0x00, TetrisState::DifficultySelection)
        } else {
            (SLAVE, TetrisState::SendingInitializationData)
        };

        session
            .for_all_peers(|peer| async move {
                peer.exchange_byte(CONFIRM_MENU).await?;
                peer.wait_for_byte(POLL, READY_FOR_RESTART).await?;
                peer.wait_for_byte(END_ROUND_OVER_SCREEN, expected).await
            })
            .await?;

        session.set_state(next);
        Ok(())
    })
}
