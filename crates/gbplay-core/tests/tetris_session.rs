//! End-to-end tests for a Tetris session driven over in-memory links.
//!
//! # Purpose
//!
//! Each test wires a [`Session<Tetris>`] to one or two simulated consoles
//! through `tokio::io::duplex` pipes and checks what the consoles receive and
//! where the state machine ends up.  They verify:
//!
//! - Admission: the session waits for exactly two peers.
//! - Each protocol state's byte sequence and transition.
//! - Round scoring, including draws.
//! - Teardown: a peer leaving mid-game ends the session quietly, a silent
//!   peer ends it with a timeout.
//!
//! # Simulated consoles
//!
//! A console here is a task that answers every byte it receives with a byte
//! computed from it.  Real hardware answers with whatever it had loaded
//! *before* the transfer, but for the handshakes under test the difference
//! does not matter.
//!
//! All tests run with a paused clock, so the multi-second protocol delays
//! (difficulty quiescence, results screen, exchange timeout) take no real
//! time.

use std::time::Duration;

use gbplay_core::games::tetris::ctrl::{
    BEGIN_ROUND_OVER_SCREEN, CONFIRM_MENU, CONFIRM_MUSIC, EMPTY_TILE, END_ROUND_OVER_SCREEN, LOSE,
    MASTER, MUSIC_TYPE_A, MUSIC_TYPE_C, POLL, READY_FOR_MUSIC, READY_FOR_RESTART,
    READY_FOR_ROUND_END, SLAVE, SOLID_TILE, START_SEQUENCE,
};
use gbplay_core::games::tetris::payload::{GARBAGE_CELLS, PIECE_COUNT};
use gbplay_core::games::tetris::{
    MusicType, Player, RoundOutcome, MENU_PACING, ROUND_OVER_DELAY,
};
use gbplay_core::{
    LinkChannel, LinkError, LinkSettings, Session, SessionError, SessionEvent, Tetris,
    TetrisSettings, TetrisState,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_test::{assert_err, assert_ok};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn peer(name: &str) -> (LinkChannel, DuplexStream) {
    let (server, console) = tokio::io::duplex(512);
    (LinkChannel::new(server, name, LinkSettings::default()), console)
}

/// Answers every received byte with `reply(byte)`; returns everything it was
/// sent once the server hangs up.
fn console<F>(mut stream: DuplexStream, mut reply: F) -> JoinHandle<Vec<u8>>
where
    F: FnMut(u8) -> u8 + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut buf = [0u8; 1];
        while let Ok(1) = stream.read(&mut buf).await {
            seen.push(buf[0]);
            if stream.write_all(&[reply(buf[0])]).await.is_err() {
                break;
            }
        }
        seen
    })
}

/// Answers with `script` in order, then keeps repeating its last byte.
fn scripted(script: &[u8]) -> impl FnMut(u8) -> u8 + Send + 'static {
    let script = script.to_vec();
    let mut next = 0;
    move |_| {
        let byte = script[next.min(script.len() - 1)];
        next += 1;
        byte
    }
}

struct Table {
    session: Session<Tetris>,
    console_a: JoinHandle<Vec<u8>>,
    console_b: JoinHandle<Vec<u8>>,
}

impl Table {
    fn new<A, B>(settings: TetrisSettings, reply_a: A, reply_b: B) -> Self
    where
        A: FnMut(u8) -> u8 + Send + 'static,
        B: FnMut(u8) -> u8 + Send + 'static,
    {
        let session = Session::new("TEST", Tetris::new(settings), None);
        let (a, stream_a) = peer("a");
        let (b, stream_b) = peer("b");
        let console_a = console(stream_a, reply_a);
        let console_b = console(stream_b, reply_b);
        session.handle().add_peer(a).unwrap();
        session.handle().add_peer(b).unwrap();
        Self {
            session,
            console_a,
            console_b,
        }
    }

    /// Ends the session and collects what each console received.
    async fn finish(self) -> (Vec<u8>, Vec<u8>) {
        self.session.handle().end();
        (self.console_a.await.unwrap(), self.console_b.await.unwrap())
    }
}

// ── Admission ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_waiting_for_players_advances_only_after_second_peer() {
    // Arrange: one peer present
    let mut session = Session::new("WAIT", Tetris::new(TetrisSettings::default()), None);
    let (a, stream_a) = peer("a");
    let _console_a = console(stream_a, |_| 0x00);
    assert_ok!(session.handle().add_peer(a));

    // Act / Assert: the handler keeps waiting with one peer
    let still_waiting = time::timeout(Duration::from_secs(1), session.step()).await;
    assert!(still_waiting.is_err(), "must not advance with one peer");
    assert_eq!(session.state(), TetrisState::WaitingForPlayers);

    // Act / Assert: the second peer unblocks it
    let (b, stream_b) = peer("b");
    let _console_b = console(stream_b, |_| 0x00);
    assert_ok!(session.handle().add_peer(b));
    assert_ok!(session.step().await);
    assert_eq!(session.state(), TetrisState::PlayersConnected);
}

// ── Menus ─────────────────────────────────────────────────────────────────────

fn menu_console(music: u8) -> impl FnMut(u8) -> u8 + Send + 'static {
    move |byte| match byte {
        MASTER => SLAVE,
        b if b == music => READY_FOR_MUSIC,
        _ => 0x00,
    }
}

#[tokio::test(start_paused = true)]
async fn test_players_connected_runs_handshake_and_music_selection() {
    // Arrange
    let mut table = Table::new(
        TetrisSettings::default(),
        menu_console(MUSIC_TYPE_A),
        menu_console(MUSIC_TYPE_A),
    );
    table.session.set_state(TetrisState::PlayersConnected);

    // Act
    assert_ok!(table.session.step().await);

    // Assert
    assert_eq!(table.session.state(), TetrisState::DifficultySelection);
    assert_eq!(table.session.peer(0).unwrap().pacing(), MENU_PACING);
    let (seen_a, seen_b) = table.finish().await;
    assert_eq!(seen_a, vec![MASTER, MUSIC_TYPE_A, CONFIRM_MUSIC]);
    assert_eq!(seen_b, vec![MASTER, MUSIC_TYPE_A, CONFIRM_MUSIC]);
}

#[tokio::test(start_paused = true)]
async fn test_players_connected_polls_until_console_answers() {
    // Console B takes three polls to become slave, and uses the configured music.
    let mut slave_after = 3;
    let reluctant = move |byte: u8| match byte {
        MASTER if slave_after > 1 => {
            slave_after -= 1;
            0x00
        }
        MASTER => SLAVE,
        MUSIC_TYPE_C => READY_FOR_MUSIC,
        _ => 0x00,
    };
    let settings = TetrisSettings {
        music: MusicType::C,
        ..TetrisSettings::default()
    };
    let mut table = Table::new(settings, menu_console(MUSIC_TYPE_C), reluctant);
    table.session.set_state(TetrisState::PlayersConnected);

    assert_ok!(table.session.step().await);

    let (_, seen_b) = table.finish().await;
    assert_eq!(seen_b, vec![MASTER, MASTER, MASTER, MUSIC_TYPE_C, CONFIRM_MUSIC]);
}

#[tokio::test(start_paused = true)]
async fn test_difficulty_selection_confirms_after_quiet_period_and_resets_match() {
    // Arrange: each console holds a fixed difficulty and confirms the menu
    let mut table = Table::new(
        TetrisSettings::default(),
        |byte| if byte == CONFIRM_MENU { SLAVE } else { 0x01 },
        |byte| if byte == CONFIRM_MENU { SLAVE } else { 0x02 },
    );
    table.session.protocol_mut().record(RoundOutcome::Winner(Player::One));
    table.session.set_state(TetrisState::DifficultySelection);
    let started = Instant::now();

    // Act
    assert_ok!(table.session.step().await);

    // Assert
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(table.session.state(), TetrisState::SendingInitializationData);
    assert_eq!(table.session.protocol().wins(Player::One), 0, "new match");
    let (seen_a, seen_b) = table.finish().await;
    // Each console is shown the other's difficulty, then the confirm byte.
    assert_eq!(seen_a.last(), Some(&CONFIRM_MENU));
    assert!(seen_a[1..seen_a.len() - 1].iter().all(|&b| b == 0x02));
    assert!(seen_b[1..seen_b.len() - 1].iter().all(|&b| b == 0x01));
}

// ── Round setup ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_initialization_sends_identical_payloads_then_start_sequence() {
    // Arrange
    let handshake = |byte: u8| if byte == MASTER { SLAVE } else { 0x00 };
    let mut table = Table::new(TetrisSettings::default(), handshake, handshake);
    table.session.set_state(TetrisState::SendingInitializationData);

    // Act
    assert_ok!(table.session.step().await);

    // Assert: state and pacing
    assert_eq!(table.session.state(), TetrisState::Playing);
    assert_eq!(table.session.protocol().round(), 1);
    assert_eq!(table.session.peer(1).unwrap().pacing(), MENU_PACING);

    // Assert: MASTER, garbage, MASTER, pieces, start sequence
    let (seen_a, seen_b) = table.finish().await;
    assert_eq!(seen_a, seen_b, "both consoles get the same round data");
    assert_eq!(seen_a.len(), 1 + GARBAGE_CELLS + 1 + PIECE_COUNT + START_SEQUENCE.len());
    assert_eq!(seen_a[0], MASTER);
    let garbage = &seen_a[1..=GARBAGE_CELLS];
    assert!(garbage.iter().all(|&c| c == EMPTY_TILE || c & SOLID_TILE != 0));
    assert_eq!(seen_a[GARBAGE_CELLS + 1], MASTER);
    let pieces = &seen_a[GARBAGE_CELLS + 2..GARBAGE_CELLS + 2 + PIECE_COUNT];
    assert!(pieces.iter().all(|&p| p % 4 == 0 && p < 28));
    assert_eq!(&seen_a[seen_a.len() - START_SEQUENCE.len()..], &START_SEQUENCE);
}

// ── Playing ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_loss_by_first_player_credits_second_player() {
    // Arrange: A tops out (LOSE), then both report ready-for-round-end
    let mut table = Table::new(
        TetrisSettings::default(),
        scripted(&[0x00, 0x00, LOSE, LOSE, READY_FOR_ROUND_END]),
        scripted(&[0x00, 0x00, READY_FOR_ROUND_END]),
    );
    table.session.set_state(TetrisState::Playing);

    // Act
    assert_ok!(table.session.step().await);

    // Assert
    let tetris = table.session.protocol();
    assert_eq!(tetris.wins(Player::Two), 1);
    assert_eq!(tetris.wins(Player::One), 0);
    assert_eq!(tetris.last_outcome(), Some(RoundOutcome::Winner(Player::Two)));
    assert_eq!(table.session.state(), TetrisState::RoundOver);

    let (_, seen_b) = table.finish().await;
    // B was shown A's bytes, then polled and sent to the results screen.
    assert_eq!(
        seen_b,
        vec![
            0x00,
            0x00,
            0x00,
            LOSE,
            LOSE,
            READY_FOR_ROUND_END,
            POLL,
            BEGIN_ROUND_OVER_SCREEN
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_matching_terminal_bytes_are_a_draw_polled_with_that_byte() {
    let mut table = Table::new(
        TetrisSettings::default(),
        scripted(&[LOSE, READY_FOR_ROUND_END]),
        scripted(&[LOSE, READY_FOR_ROUND_END]),
    );
    table.session.set_state(TetrisState::Playing);

    assert_ok!(table.session.step().await);

    let tetris = table.session.protocol();
    assert_eq!(tetris.last_outcome(), Some(RoundOutcome::Draw { shared: LOSE }));
    assert_eq!(tetris.wins(Player::One), 0);
    assert_eq!(tetris.wins(Player::Two), 0);
    let (seen_a, seen_b) = table.finish().await;
    assert!(seen_a.ends_with(&[LOSE, BEGIN_ROUND_OVER_SCREEN]));
    assert!(seen_b.ends_with(&[LOSE, BEGIN_ROUND_OVER_SCREEN]));
}

// ── Round over ────────────────────────────────────────────────────────────────

fn restart_console(end_answer: u8) -> impl FnMut(u8) -> u8 + Send + 'static {
    move |byte| match byte {
        POLL => READY_FOR_RESTART,
        END_ROUND_OVER_SCREEN => end_answer,
        _ => 0x00,
    }
}

#[tokio::test(start_paused = true)]
async fn test_round_over_moves_to_next_round_before_threshold() {
    let mut table = Table::new(
        TetrisSettings::default(),
        restart_console(SLAVE),
        restart_console(SLAVE),
    );
    table.session.protocol_mut().record(RoundOutcome::Winner(Player::One));
    table.session.set_state(TetrisState::RoundOver);
    let started = Instant::now();

    assert_ok!(table.session.step().await);

    assert!(started.elapsed() >= ROUND_OVER_DELAY);
    assert_eq!(table.session.state(), TetrisState::SendingInitializationData);
    let (seen_a, _) = table.finish().await;
    assert_eq!(seen_a, vec![CONFIRM_MENU, POLL, END_ROUND_OVER_SCREEN]);
}

#[tokio::test(start_paused = true)]
async fn test_round_over_restarts_match_at_threshold() {
    let mut table = Table::new(
        TetrisSettings::default(),
        restart_console(0x00),
        restart_console(0x00),
    );
    for _ in 0..4 {
        table.session.protocol_mut().record(RoundOutcome::Winner(Player::Two));
    }
    table.session.set_state(TetrisState::RoundOver);

    assert_ok!(table.session.step().await);

    assert_eq!(table.session.state(), TetrisState::DifficultySelection);
    table.finish().await;
}

// ── Teardown ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_peer_leaving_mid_game_ends_session_quietly() {
    // Arrange: B answers five bytes and then unplugs
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new("DROP", Tetris::new(TetrisSettings::default()), Some(tx));
    let (a, stream_a) = peer("a");
    let (b, mut stream_b) = peer("b");
    let console_a = console(stream_a, |_| 0x00);
    tokio::spawn(async move {
        let mut buf = [0u8; 1];
        for _ in 0..5 {
            if stream_b.read_exact(&mut buf).await.is_err() {
                return;
            }
            let _ = stream_b.write_all(&[0x00]).await;
        }
    });
    session.handle().add_peer(a).unwrap();
    session.handle().add_peer(b).unwrap();
    session.set_state(TetrisState::Playing);
    let handle = session.handle().clone();

    // Act
    let result = session.run().await;

    // Assert: not treated as a fault, one notification, survivor hung up on
    assert_ok!(result);
    assert!(handle.is_ended());
    assert_eq!(
        rx.recv().await,
        Some(SessionEvent::Ended {
            session_id: "DROP".to_string()
        })
    );
    time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "exactly one ended notification");
    assert!(!console_a.await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out_and_ends_session() {
    // Arrange: A completes the handshake, B never answers anything
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Session::new("IDLE", Tetris::new(TetrisSettings::default()), Some(tx));
    let (a, stream_a) = peer("a");
    let (b, mut stream_b) = peer("b");
    let console_a = console(stream_a, menu_console(MUSIC_TYPE_A));
    let console_b = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        while let Ok(n) = stream_b.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });
    session.handle().add_peer(a).unwrap();
    session.handle().add_peer(b).unwrap();
    let started = Instant::now();

    // Act: runs WaitingForPlayers, then stalls in PlayersConnected
    let err = assert_err!(session.run().await);

    // Assert
    assert!(
        matches!(err, SessionError::Link(LinkError::Timeout { ref peer, .. }) if peer == "b"),
        "got {err:?}"
    );
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(matches!(rx.recv().await, Some(SessionEvent::Ended { .. })));
    console_b.await.unwrap();
    assert_eq!(
        console_a.await.unwrap(),
        vec![MASTER, MUSIC_TYPE_A, CONFIRM_MUSIC]
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out_while_partner_is_still_polling() {
    // Arrange: A answers every poll with 0x00 and never hands over; B is mute
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new("MUTE", Tetris::new(TetrisSettings::default()), Some(tx));
    let (a, stream_a) = peer("a");
    let (b, mut stream_b) = peer("b");
    let console_a = console(stream_a, |_| 0x00);
    tokio::spawn(async move {
        let mut buf = [0u8; 16];
        while let Ok(n) = stream_b.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });
    session.handle().add_peer(a).unwrap();
    session.handle().add_peer(b).unwrap();
    session.set_state(TetrisState::PlayersConnected);

    // Act
    let err = assert_err!(session.run().await);

    // Assert: the timeout is reported even though it is what ended the session
    assert!(
        matches!(err, SessionError::Link(LinkError::Timeout { ref peer, .. }) if peer == "b"),
        "got {err:?}"
    );
    assert!(matches!(rx.recv().await, Some(SessionEvent::Ended { .. })));
    assert!(console_a.await.unwrap().iter().all(|&byte| byte == MASTER));
}
