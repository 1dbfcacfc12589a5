// src/maze/generator.rs
// Seeded maze carving: random wall removal joined through a disjoint set,
// followed by the exit/entrance openings and room designation.
//
// Clients never receive the grid itself, only (size, seed, room_rate, open_entrance),
// and rebuild it locally. Any change to the draw order below breaks that agreement.

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cell::{Direction, Walls};
use super::disjoint_set::DisjointSet;

/// Hard ceiling on `size`; keeps the rejection loop and the cell array bounded
pub const MAX_MAZE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MazeError {
    #[error("maze size must be between 1 and {max}, got {size}")]
    InvalidSize { size: usize, max: usize },

    #[error("room rate must be within [0, 1], got {0}")]
    InvalidRoomRate(f32),
}

/// Inputs to a maze build request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MazeOptions {
    pub size: usize,
    pub seed: u64,
    pub room_rate: f32,
    /// Also clear the Left wall of cell 0. Off by default.
    #[serde(default)]
    pub open_entrance: bool,
}

impl MazeOptions {
    pub fn new(size: usize, seed: u64, room_rate: f32) -> Self {
        Self {
            size,
            seed,
            room_rate,
            open_entrance: false,
        }
    }

    pub fn with_open_entrance(mut self, open: bool) -> Self {
        self.open_entrance = open;
        self
    }

    fn validate(&self) -> Result<(), MazeError> {
        if self.size == 0 || self.size > MAX_MAZE_SIZE {
            return Err(MazeError::InvalidSize {
                size: self.size,
                max: MAX_MAZE_SIZE,
            });
        }
        if !self.room_rate.is_finite() || !(0.0..=1.0).contains(&self.room_rate) {
            return Err(MazeError::InvalidRoomRate(self.room_rate));
        }
        Ok(())
    }
}

/// Counters collected while carving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub draws: u64,
    pub rejected_draws: u64,
    pub edge_draws: u64,
    pub unions: usize,
}

/// A finished maze. Immutable once returned by the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct MazeGrid {
    options: MazeOptions,
    cells: Vec<Walls>,
    stats: GenerationStats,
}

/// Wire form of a maze for builders that want the full grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MazeLayout {
    pub size: usize,
    pub seed: u64,
    pub room_rate: f32,
    pub open_entrance: bool,
    pub cells: Vec<u8>,
    pub rooms: Vec<usize>,
}

/// True when `index` has no neighbor in `direction`.
/// Flattening is `index = x * size + y`, so Up/Down move across rows of `size`.
pub fn is_maze_edge(index: usize, size: usize, direction: Direction) -> bool {
    match direction {
        Direction::Left => index % size == 0,
        Direction::Right => index % size == size - 1,
        Direction::Up => index / size == size - 1,
        Direction::Down => index / size == 0,
    }
}

/// Neighbor index in `direction`, or None off the grid
pub fn neighbor_index(index: usize, size: usize, direction: Direction) -> Option<usize> {
    if is_maze_edge(index, size, direction) {
        return None;
    }
    Some(match direction {
        Direction::Left => index - 1,
        Direction::Right => index + 1,
        Direction::Up => index + size,
        Direction::Down => index - size,
    })
}

impl MazeGrid {
    pub fn options(&self) -> MazeOptions {
        self.options
    }

    pub fn size(&self) -> usize {
        self.options.size
    }

    pub fn seed(&self) -> u64 {
        self.options.seed
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn stats(&self) -> GenerationStats {
        self.stats
    }

    pub fn cells(&self) -> &[Walls] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<Walls> {
        self.cells.get(index).copied()
    }

    /// Raw per-cell bitmasks as consumed by the geometry builder
    pub fn cell_bits(&self) -> Vec<u8> {
        self.cells.iter().map(|cell| cell.bits()).collect()
    }

    pub fn has_wall(&self, index: usize, direction: Direction) -> bool {
        self.cells[index].has_wall(direction)
    }

    pub fn is_room(&self, index: usize) -> bool {
        self.cells[index].is_room()
    }

    pub fn neighbor(&self, index: usize, direction: Direction) -> Option<usize> {
        neighbor_index(index, self.size(), direction)
    }

    pub fn rooms(&self) -> Vec<usize> {
        (0..self.cells.len()).filter(|&i| self.is_room(i)).collect()
    }

    pub fn to_layout(&self) -> MazeLayout {
        MazeLayout {
            size: self.options.size,
            seed: self.options.seed,
            room_rate: self.options.room_rate,
            open_entrance: self.options.open_entrance,
            cells: self.cell_bits(),
            rooms: self.rooms(),
        }
    }
}

/// Deterministic maze generator
pub struct MazeGenerator;

impl MazeGenerator {
    /// `Generate(size, seed, roomRate)` with the entrance left closed
    pub fn generate(size: usize, seed: u64, room_rate: f32) -> Result<MazeGrid, MazeError> {
        Self::generate_with(MazeOptions::new(size, seed, room_rate))
    }

    pub fn generate_with(options: MazeOptions) -> Result<MazeGrid, MazeError> {
        options.validate()?;

        let size = options.size;
        let cell_count = size * size;
        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        let mut cells = vec![Walls::ALL_WALLS; cell_count];
        let mut sets = DisjointSet::new(cell_count);
        let mut stats = GenerationStats::default();

        // component_count() == 1 is the same predicate as is_fully_connected(),
        // evaluated in O(1), so the draw sequence is identical either way.
        while sets.component_count() > 1 {
            let index = rng.gen_range(0..cell_count);
            let direction = Direction::from_index(rng.gen_range(0..4));
            stats.draws += 1;

            if !cells[index].has_wall(direction) {
                stats.rejected_draws += 1;
                continue;
            }

            let Some(neighbor) = neighbor_index(index, size, direction) else {
                stats.edge_draws += 1;
                continue;
            };

            if sets.find(index) != sets.find(neighbor) {
                cells[index].remove(direction.wall());
                cells[neighbor].remove(direction.opposite().wall());
                sets.union(index, neighbor);
                stats.unions += 1;
            }
        }
        debug_assert!(sets.is_fully_connected());

        // Exit is always the Right wall of the last cell
        cells[cell_count - 1].remove(Walls::RIGHT);
        if options.open_entrance {
            cells[0].remove(Walls::LEFT);
        }

        Self::designate_rooms(&mut cells, options.room_rate, &mut rng);

        debug!(
            size = size,
            seed = options.seed,
            draws = stats.draws,
            rejected = stats.rejected_draws,
            unions = stats.unions,
            "Maze generated"
        );

        Ok(MazeGrid {
            options,
            cells,
            stats,
        })
    }

    /// Mark `floor(N * rate)` distinct cells as rooms, never the first or last cell
    fn designate_rooms(cells: &mut [Walls], room_rate: f32, rng: &mut ChaCha8Rng) {
        let cell_count = cells.len();
        let eligible = cell_count.saturating_sub(2);
        // Multiply in f32: widening the rate first turns 0.7 into 0.6999...
        let rooms_to_pick = ((cell_count as f32 * room_rate).floor() as usize).min(eligible);

        let mut picked = BTreeSet::new();
        while picked.len() < rooms_to_pick {
            picked.insert(rng.gen_range(1..cell_count - 1));
        }

        for index in picked {
            cells[index].insert(Walls::ROOM);
        }
    }
}
