//! Control bytes understood by the Tetris cartridge's link routines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Master side of the master/slave handshake.
pub const MASTER: u8 = 0x29;
/// The console's answer once it has accepted the slave role.
pub const SLAVE: u8 = 0x55;

/// Marker bit on a filled garbage cell; the low bits select the tile.
pub const SOLID_TILE: u8 = 0x80;
pub const EMPTY_TILE: u8 = 0x2F;

pub const READY_FOR_MUSIC: u8 = 0x39;
pub const MUSIC_TYPE_A: u8 = 0x1C;
pub const MUSIC_TYPE_B: u8 = 0x1D;
pub const MUSIC_TYPE_C: u8 = 0x1E;
pub const MUSIC_OFF: u8 = 0x1F;
pub const CONFIRM_MUSIC: u8 = 0x50;

pub const CONFIRM_MENU: u8 = 0x60;

/// Terminal bytes a console emits when its side of the round is decided.
pub const WIN: u8 = 0x77;
pub const LOSE: u8 = 0xAA;

pub const POLL: u8 = 0x02;
pub const READY_FOR_ROUND_END: u8 = 0x34;
pub const READY_FOR_RESTART: u8 = 0x27;
pub const BEGIN_ROUND_OVER_SCREEN: u8 = 0x43;
pub const END_ROUND_OVER_SCREEN: u8 = 0x79;

/// Sent to both consoles after the payloads to start the round.
pub const START_SEQUENCE: [u8; 5] = [0x30, 0x00, 0x02, 0x02, 0x20];

/// `true` for [`WIN`] and [`LOSE`].
pub fn is_terminal(byte: u8) -> bool {
    byte == WIN || byte == LOSE
}

/// Background music picked on the music selection screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicType {
    #[default]
    A,
    B,
    C,
    Off,
}

impl MusicType {
    /// The byte that selects this music on the cartridge.
    pub fn byte(self) -> u8 {
        match self {
            MusicType::A => MUSIC_TYPE_A,
            MusicType::B => MUSIC_TYPE_B,
            MusicType::C => MUSIC_TYPE_C,
            MusicType::Off => MUSIC_OFF,
        }
    }
}

impl fmt::Display for MusicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MusicType::A => "a",
            MusicType::B => "b",
            MusicType::C => "c",
            MusicType::Off => "off",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown music type '{0}' (expected a, b, c or off)")]
pub struct ParseMusicTypeError(String);

impl FromStr for MusicType {
    type Err = ParseMusicTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(MusicType::A),
            "b" => Ok(MusicType::B),
            "c" => Ok(MusicType::C),
            "off" => Ok(MusicType::Off),
            _ => Err(ParseMusicTypeError(s.to_string())),
        }
    }
}
