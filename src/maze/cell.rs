// src/maze/cell.rs
// Wall bitmask for a single maze cell plus the four cardinal directions

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Wall presence bits for one cell (1 = wall present).
    /// Bit order must match the client builder: Left=0, Up=1, Right=2, Down=3, Room=4.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Walls: u8 {
        const LEFT = 1 << 0;
        const UP = 1 << 1;
        const RIGHT = 1 << 2;
        const DOWN = 1 << 3;
        const ROOM = 1 << 4;

        const ALL_WALLS = Self::LEFT.bits() | Self::UP.bits() | Self::RIGHT.bits() | Self::DOWN.bits();
    }
}

impl Walls {
    pub fn has_wall(&self, direction: Direction) -> bool {
        self.contains(direction.wall())
    }

    pub fn is_room(&self) -> bool {
        self.contains(Walls::ROOM)
    }
}

impl Default for Walls {
    fn default() -> Self {
        Walls::ALL_WALLS
    }
}

/// Cardinal direction, discriminant doubles as the wall bit index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left = 0,
    Up = 1,
    Right = 2,
    Down = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Left, Direction::Up, Direction::Right, Direction::Down];

    pub fn from_index(index: usize) -> Direction {
        Self::ALL[index % 4]
    }

    /// `(d + 2) mod 4`
    pub fn opposite(self) -> Direction {
        Self::from_index(self as usize + 2)
    }

    pub fn wall(self) -> Walls {
        Walls::from_bits_truncate(1 << self as u8)
    }
}
