//! Per-round payloads: the garbage board and the piece queue.
//!
//! Both follow the cartridge's own randomizers so the data looks the way the
//! firmware would have produced it for a local two-player game.  The
//! generators take any [`Rng`] so a seeded generator can pin them down.

use rand::Rng;

use super::ctrl::{EMPTY_TILE, SOLID_TILE};

/// Cells in the garbage board.
pub const GARBAGE_CELLS: usize = 100;
/// Distinct solid tile graphics.
pub const TILE_VARIANTS: u8 = 8;

/// Entries in the piece queue.
pub const PIECE_COUNT: usize = 256;
/// Distinct tetrominoes.
pub const PIECE_KINDS: u8 = 7;
/// Piece selectors are multiples of this.
pub const PIECE_STRIDE: u8 = 4;
/// Draws per position before a repeat is accepted anyway.
pub const PIECE_ATTEMPTS: usize = 3;

/// Bits of a selector that identify the piece.
const PIECE_MASK: u8 = 0xFC;

/// Fills the garbage board: each cell is independently empty or, with equal
/// odds, one of the solid tile variants.
pub fn garbage_board<R: Rng>(rng: &mut R) -> Vec<u8> {
    (0..GARBAGE_CELLS)
        .map(|_| {
            if rng.gen_bool(0.5) {
                SOLID_TILE | rng.gen_range(0..TILE_VARIANTS)
            } else {
                EMPTY_TILE
            }
        })
        .collect()
}

/// Builds the piece queue.
///
/// Each position draws up to [`PIECE_ATTEMPTS`] candidates and keeps the
/// first one that [`is_rejected_repeat`] lets through, or the last draw if
/// none does.  Positions before the start of the queue count as piece 0.
pub fn piece_sequence<R: Rng>(rng: &mut R) -> Vec<u8> {
    let mut pieces: Vec<u8> = Vec::with_capacity(PIECE_COUNT);

    for _ in 0..PIECE_COUNT {
        let prev1 = pieces.last().copied().unwrap_or(0);
        let prev2 = pieces
            .len()
            .checked_sub(2)
            .map_or(0, |i| pieces[i]);

        let mut next = 0;
        for _ in 0..PIECE_ATTEMPTS {
            next = rng.gen_range(0..PIECE_KINDS) * PIECE_STRIDE;
            if !is_rejected_repeat(next, prev1, prev2) {
                break;
            }
        }
        pieces.push(next);
    }

    pieces
}

/// The cartridge's anti-repeat test: a candidate is redrawn when OR-ing it
/// with the previous two selections (piece bits only) gives back the one two
/// positions ago.
pub fn is_rejected_repeat(candidate: u8, prev1: u8, prev2: u8) -> bool {
    (candidate | prev1 | prev2) & PIECE_MASK == prev2
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn count_triples(pieces: &[u8]) -> usize {
        pieces
            .windows(3)
            .filter(|w| w[0] == w[1] && w[1] == w[2])
            .count()
    }

    #[test]
    fn test_garbage_board_cells_are_empty_or_tagged_solid() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let board = garbage_board(&mut rng);

        assert_eq!(board.len(), GARBAGE_CELLS);
        for cell in board {
            assert!(
                cell == EMPTY_TILE || (SOLID_TILE..SOLID_TILE + TILE_VARIANTS).contains(&cell),
                "unexpected cell {cell:#04x}"
            );
        }
    }

    #[test]
    fn test_garbage_board_is_about_half_empty_and_uses_every_tile() {
        let mut rng = ChaCha8Rng::seed_from_u64(1989);
        let cells: Vec<u8> = (0..100).flat_map(|_| garbage_board(&mut rng)).collect();

        let empty = cells.iter().filter(|&&c| c == EMPTY_TILE).count();
        let ratio = empty as f64 / cells.len() as f64;
        assert!((0.45..0.55).contains(&ratio), "empty ratio {ratio}");

        for variant in 0..TILE_VARIANTS {
            assert!(cells.contains(&(SOLID_TILE | variant)), "tile {variant} never drawn");
        }
    }

    #[test]
    fn test_piece_sequence_uses_strided_selectors_for_all_kinds() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let pieces = piece_sequence(&mut rng);

        assert_eq!(pieces.len(), PIECE_COUNT);
        assert!(pieces
            .iter()
            .all(|&p| p % PIECE_STRIDE == 0 && p < PIECE_KINDS * PIECE_STRIDE));
        for kind in 0..PIECE_KINDS {
            assert!(pieces.contains(&(kind * PIECE_STRIDE)), "piece {kind} missing");
        }
    }

    #[test]
    fn test_same_seed_gives_same_payloads() {
        let mut a = ChaCha8Rng::seed_from_u64(3);
        let mut b = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(piece_sequence(&mut a), piece_sequence(&mut b));
        assert_eq!(garbage_board(&mut a), garbage_board(&mut b));
    }

    #[test]
    fn test_repeat_filter_matches_cartridge_rule() {
        // Start of the queue: only piece 0 collides with the implicit zeros.
        assert!(is_rejected_repeat(0x00, 0x00, 0x00));
        assert!(!is_rejected_repeat(0x04, 0x00, 0x00));
        // A straight triple is always rejected.
        assert!(is_rejected_repeat(0x08, 0x08, 0x08));
        // So is any candidate whose bits are already covered by prev2.
        assert!(is_rejected_repeat(0x04, 0x08, 0x0C));
        assert!(!is_rejected_repeat(0x10, 0x08, 0x0C));
    }

    #[test]
    fn test_repeat_filter_suppresses_triples() {
        // Arrange
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let mut filtered = 0;
        let mut unfiltered = 0;

        // Act
        for _ in 0..50 {
            filtered += count_triples(&piece_sequence(&mut rng));
            let raw: Vec<u8> = (0..PIECE_COUNT)
                .map(|_| rng.gen_range(0..PIECE_KINDS) * PIECE_STRIDE)
                .collect();
            unfiltered += count_triples(&raw);
        }

        // Assert
        assert!(
            filtered * 2 < unfiltered,
            "filtered {filtered} vs unfiltered {unfiltered}"
        );
    }
}
