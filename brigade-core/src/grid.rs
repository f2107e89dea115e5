//! The shared 2-D world of cells.
//!
//! Every process keeps its own `Grid` as a local view of the world, driven
//! only by the messages it consumes. The grid also provides the fire
//! dynamics used by whoever generates announcements: random ignition, growth,
//! and orthogonal spread.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Side length of the square world.
pub const GRID_SIZE: i32 = 20;

/// Per-tick chance of a fresh random ignition.
pub const IGNITE_CHANCE: f64 = 0.10;

/// Per-neighbor chance that a burning cell spreads on one step.
pub const SPREAD_CHANCE: f64 = 0.02;

/// Intensity gained by every burning cell on one step.
pub const GROWTH_PER_STEP: u32 = 1;

/// Cap on the exponent of the per-step extinguish cost.
const MAX_COST_EXPONENT: u32 = 10;

/// State of a single cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    /// Nothing here.
    #[default]
    Empty,
    /// Burning, with an intensity carried by the cell.
    Fire,
    /// Was burning, has been put out.
    Extinguished,
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellState::Empty => write!(f, "empty"),
            CellState::Fire => write!(f, "fire"),
            CellState::Extinguished => write!(f, "extinguished"),
        }
    }
}

/// A cell of the world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub state: CellState,
    pub intensity: u32,
}

impl Cell {
    /// A burning cell at the given intensity.
    pub fn fire(intensity: u32) -> Self {
        Self {
            state: CellState::Fire,
            intensity,
        }
    }

    /// An extinguished cell.
    pub fn extinguished() -> Self {
        Self {
            state: CellState::Extinguished,
            intensity: 0,
        }
    }
}

/// A fire sighting: where it burns and how hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireLocation {
    pub row: i32,
    pub col: i32,
    pub intensity: u32,
}

impl FireLocation {
    /// The identifier of the fire at this location.
    pub fn id(&self) -> crate::FireId {
        crate::FireId::new(self.row, self.col)
    }
}

/// The square world grid.
#[derive(Debug, Clone)]
pub struct Grid {
    cells: Vec<Cell>,
    size: i32,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl Grid {
    /// Create an empty grid of the default size.
    pub fn new() -> Self {
        Self::with_size(GRID_SIZE)
    }

    /// Create an empty grid with a custom side length.
    pub fn with_size(size: i32) -> Self {
        Self {
            cells: vec![Cell::default(); (size * size) as usize],
            size,
        }
    }

    /// Side length of the grid.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Whether the coordinates fall inside the grid.
    pub fn in_bounds(&self, row: i32, col: i32) -> bool {
        (0..self.size).contains(&row) && (0..self.size).contains(&col)
    }

    fn index(&self, row: i32, col: i32) -> usize {
        (row * self.size + col) as usize
    }

    /// Read a cell. Out-of-bounds coordinates read as empty.
    pub fn cell(&self, row: i32, col: i32) -> Cell {
        if !self.in_bounds(row, col) {
            return Cell::default();
        }
        self.cells[self.index(row, col)]
    }

    /// Write a cell. Out-of-bounds writes are ignored.
    pub fn set_cell(&mut self, row: i32, col: i32, cell: Cell) {
        if self.in_bounds(row, col) {
            let idx = self.index(row, col);
            self.cells[idx] = cell;
        }
    }

    /// Maybe ignite one random empty cell with a fresh intensity-1 fire.
    pub fn ignite_random<R: Rng>(&mut self, rng: &mut R, chance: f64) -> Option<FireLocation> {
        if rng.gen::<f64>() >= chance {
            return None;
        }
        let row = rng.gen_range(0..self.size);
        let col = rng.gen_range(0..self.size);
        if self.cell(row, col).state != CellState::Empty {
            return None;
        }
        self.set_cell(row, col, Cell::fire(1));
        Some(FireLocation {
            row,
            col,
            intensity: 1,
        })
    }

    /// Advance the fire dynamics by one step.
    ///
    /// Every burning cell grows by [`GROWTH_PER_STEP`] and rolls to spread to
    /// each orthogonal empty neighbor. Returns the newly ignited cells so the
    /// caller can announce them.
    pub fn step_fires<R: Rng>(&mut self, rng: &mut R) -> Vec<FireLocation> {
        let mut next = self.cells.clone();
        let mut spread = Vec::new();

        for row in 0..self.size {
            for col in 0..self.size {
                if self.cell(row, col).state != CellState::Fire {
                    continue;
                }
                next[self.index(row, col)].intensity += GROWTH_PER_STEP;

                for (dr, dc) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
                    let (nr, nc) = (row + dr, col + dc);
                    if !self.in_bounds(nr, nc) {
                        continue;
                    }
                    let idx = self.index(nr, nc);
                    if self.cells[idx].state == CellState::Empty
                        && next[idx].state == CellState::Empty
                        && rng.gen::<f64>() < SPREAD_CHANCE
                    {
                        next[idx] = Cell::fire(1);
                        spread.push(FireLocation {
                            row: nr,
                            col: nc,
                            intensity: 1,
                        });
                    }
                }
            }
        }

        self.cells = next;
        spread
    }

    /// Water needed to remove one intensity step at the given intensity.
    pub fn step_cost(intensity: u32) -> u32 {
        1u32 << intensity.min(MAX_COST_EXPONENT)
    }

    /// Total water needed to take a fire from `intensity` down to zero.
    pub fn full_cost(intensity: u32) -> u32 {
        (1..=intensity).map(Self::step_cost).sum()
    }

    /// Apply up to `water` units to the fire at `(row, col)`.
    ///
    /// Removing one intensity step at intensity `i` costs `2^min(i, 10)`
    /// units; steps are consumed while affordable. When intensity reaches
    /// zero the cell becomes extinguished. Returns the water actually used,
    /// which is zero if the cell is not burning.
    pub fn extinguish(&mut self, row: i32, col: i32, water: u32) -> u32 {
        if !self.in_bounds(row, col) {
            return 0;
        }
        let idx = self.index(row, col);
        if self.cells[idx].state != CellState::Fire {
            return 0;
        }

        let mut remaining = water;
        let mut used = 0;
        while self.cells[idx].intensity > 0 {
            let cost = Self::step_cost(self.cells[idx].intensity);
            if remaining < cost {
                break;
            }
            remaining -= cost;
            used += cost;
            self.cells[idx].intensity -= 1;
        }

        if self.cells[idx].intensity == 0 {
            self.cells[idx] = Cell::extinguished();
        }
        used
    }

    /// All cells currently burning.
    pub fn find_all_fires(&self) -> Vec<FireLocation> {
        let mut fires = Vec::new();
        for row in 0..self.size {
            for col in 0..self.size {
                let cell = self.cell(row, col);
                if cell.state == CellState::Fire {
                    fires.push(FireLocation {
                        row,
                        col,
                        intensity: cell.intensity,
                    });
                }
            }
        }
        fires
    }

    /// Number of cells currently burning.
    pub fn active_fire_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.state == CellState::Fire)
            .count()
    }

    /// Render a compact text view: `.` empty, `F` fire, `E` extinguished,
    /// with the overlay glyphs (trucks) drawn on top.
    pub fn render(&self, overlay: &HashMap<(i32, i32), char>) -> String {
        let mut out = String::with_capacity(((self.size + 1) * self.size) as usize);
        for row in 0..self.size {
            for col in 0..self.size {
                if let Some(glyph) = overlay.get(&(row, col)) {
                    out.push(*glyph);
                    continue;
                }
                out.push(match self.cell(row, col).state {
                    CellState::Empty => '.',
                    CellState::Fire => 'F',
                    CellState::Extinguished => 'E',
                });
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn out_of_bounds_reads_empty_and_writes_are_ignored() {
        let mut grid = Grid::new();
        assert_eq!(grid.cell(-1, 5).state, CellState::Empty);
        assert_eq!(grid.cell(5, GRID_SIZE).state, CellState::Empty);

        grid.set_cell(-1, -1, Cell::fire(3));
        assert_eq!(grid.find_all_fires().len(), 0);
    }

    #[test]
    fn step_cost_doubles_then_caps() {
        assert_eq!(Grid::step_cost(1), 2);
        assert_eq!(Grid::step_cost(2), 4);
        assert_eq!(Grid::step_cost(10), 1024);
        assert_eq!(Grid::step_cost(11), 1024);
        assert_eq!(Grid::step_cost(40), 1024);
    }

    #[test]
    fn extinguish_consumes_exact_total_cost() {
        // Taking intensity i to zero costs the sum of per-step costs.
        for intensity in 1..=6 {
            let mut grid = Grid::new();
            grid.set_cell(4, 4, Cell::fire(intensity));

            let expected = Grid::full_cost(intensity);
            let used = grid.extinguish(4, 4, u32::MAX);
            assert_eq!(used, expected);
            assert_eq!(grid.cell(4, 4).state, CellState::Extinguished);
            assert_eq!(grid.cell(4, 4).intensity, 0);
        }
    }

    #[test]
    fn extinguish_stops_when_next_step_is_unaffordable() {
        let mut grid = Grid::new();
        grid.set_cell(0, 0, Cell::fire(3));

        // Steps cost 8, then 4, then 2. With 10 units the first step fits
        // and the remaining 2 cannot pay for the intensity-2 step.
        let used = grid.extinguish(0, 0, 10);
        assert_eq!(used, 8);
        assert_eq!(grid.cell(0, 0).state, CellState::Fire);
        assert_eq!(grid.cell(0, 0).intensity, 2);
    }

    #[test]
    fn extinguish_ignores_non_burning_cells() {
        let mut grid = Grid::new();
        assert_eq!(grid.extinguish(3, 3, 100), 0);

        grid.set_cell(3, 3, Cell::extinguished());
        assert_eq!(grid.extinguish(3, 3, 100), 0);
    }

    #[test]
    fn step_fires_grows_burning_cells() {
        let mut grid = Grid::new();
        grid.set_cell(10, 10, Cell::fire(2));

        let mut rng = StdRng::seed_from_u64(7);
        grid.step_fires(&mut rng);
        assert_eq!(grid.cell(10, 10).intensity, 2 + GROWTH_PER_STEP);
    }

    #[test]
    fn step_fires_reports_spread_cells_as_fires() {
        let mut grid = Grid::new();
        for row in 0..GRID_SIZE {
            for col in 0..GRID_SIZE {
                if (row + col) % 2 == 0 {
                    grid.set_cell(row, col, Cell::fire(1));
                }
            }
        }

        let mut rng = StdRng::seed_from_u64(42);
        let spread = grid.step_fires(&mut rng);
        for fire in &spread {
            assert_eq!(grid.cell(fire.row, fire.col).state, CellState::Fire);
            assert_eq!(fire.intensity, 1);
        }
    }

    #[test]
    fn ignite_random_only_hits_empty_cells() {
        let mut grid = Grid::new();
        let mut rng = StdRng::seed_from_u64(1);

        let mut lit = 0;
        for _ in 0..500 {
            if let Some(fire) = grid.ignite_random(&mut rng, 1.0) {
                assert_eq!(fire.intensity, 1);
                lit += 1;
            }
        }
        assert_eq!(grid.active_fire_count(), lit);
    }

    #[test]
    fn find_all_fires_matches_cells() {
        let mut grid = Grid::new();
        grid.set_cell(0, 0, Cell::fire(1));
        grid.set_cell(5, 7, Cell::fire(4));
        grid.set_cell(9, 9, Cell::extinguished());

        let fires = grid.find_all_fires();
        assert_eq!(fires.len(), 2);
        assert!(fires.contains(&FireLocation {
            row: 5,
            col: 7,
            intensity: 4
        }));
    }

    #[test]
    fn render_overlays_trucks() {
        let mut grid = Grid::with_size(3);
        grid.set_cell(0, 1, Cell::fire(1));
        grid.set_cell(2, 2, Cell::extinguished());

        let mut overlay = HashMap::new();
        overlay.insert((1, 1), 'T');

        let view = grid.render(&overlay);
        assert_eq!(view, ".F.\n.T.\n..E\n");
    }
}
