//! Heightmap synthesis: layered octave noise shaped into an island

use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::noise::NoiseState;

/// Bias added to the octave sum so most of the map sits below sea level
pub const SEA_BIAS: f64 = -0.7;

/// Seed offset for the overlay layer's noise
const OVERLAY_SEED_OFFSET: i64 = 1;

/// Range used to pick the barrier noise sampling offset
const BARRIER_OFFSET_RANGE: f64 = 1024.0;

/// Per-layer generation options
#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    /// Spatial frequency of the first octave
    pub scale: f64,
    /// Number of octaves summed
    pub octaves: u32,
    /// Amplitude multiplier per octave
    pub persistence: f64,
    /// Frequency multiplier per octave
    pub lacunarity: f64,

    /// Subtract a radial falloff to get an island silhouette
    pub falloff: bool,
    pub falloff_strength: f64,
    pub falloff_scale: f64,

    /// Raise a ridge near the map edge
    pub mountain_barrier: bool,
    /// Width of the ridge as a fraction of the half-extent
    pub barrier_width: f64,
    pub barrier_height: f64,
    /// Exponent shaping the ridge's inner slope
    pub barrier_falloff: f64,
    /// Perturb the ridge height with extra noise
    pub barrier_noise: bool,
    pub barrier_noise_scale: f64,
}

impl LayerConfig {
    /// Low-frequency island shape
    pub fn base() -> Self {
        Self {
            scale: 3.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            falloff: true,
            falloff_strength: 3.0,
            falloff_scale: 1.0,
            mountain_barrier: true,
            barrier_width: 0.08,
            barrier_height: 0.6,
            barrier_falloff: 2.0,
            barrier_noise: true,
            barrier_noise_scale: 8.0,
        }
    }

    /// Higher-frequency coastline detail
    pub fn overlay() -> Self {
        Self {
            scale: 12.0,
            octaves: 3,
            persistence: 0.5,
            lacunarity: 2.0,
            falloff: false,
            falloff_strength: 0.0,
            falloff_scale: 0.0,
            mountain_barrier: false,
            barrier_width: 0.0,
            barrier_height: 0.0,
            barrier_falloff: 1.0,
            barrier_noise: false,
            barrier_noise_scale: 0.0,
        }
    }
}

/// Grid size, physical extent and layer options for a lobby's terrain
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainSettings {
    pub size: usize,
    pub world_size: f64,
    pub base: LayerConfig,
    pub overlay: LayerConfig,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            size: 512,
            world_size: 2000.0,
            base: LayerConfig::base(),
            overlay: LayerConfig::overlay(),
        }
    }
}

/// Square grid of heights in [0, 1], indexed `[row][col]`
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    size: usize,
    cells: Vec<f32>,
}

impl HeightGrid {
    /// Build a grid from a per-cell function; results are clamped to [0, 1]
    pub fn from_fn(size: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut cells = Vec::with_capacity(size * size);
        for row in 0..size {
            for col in 0..size {
                cells.push(clamp_unit(f(row, col)) as f32);
            }
        }
        Self { size, cells }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Height at a cell, 0 (open water) outside the grid
    pub fn get(&self, row: usize, col: usize) -> f32 {
        if row >= self.size || col >= self.size {
            return 0.0;
        }
        self.cells[row * self.size + col]
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    /// Combine two equal-size grids cell by cell into a new grid
    fn zip_with(&self, other: &HeightGrid, f: impl Fn(f64, f64) -> f64) -> HeightGrid {
        debug_assert_eq!(self.size, other.size);
        let cells = self
            .cells
            .iter()
            .zip(&other.cells)
            .map(|(&a, &b)| clamp_unit(f(a as f64, b as f64)) as f32)
            .collect();
        HeightGrid {
            size: self.size,
            cells,
        }
    }
}

impl Serialize for HeightGrid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.cells.chunks(self.size.max(1)))
    }
}

/// The two terrain layers shared by every member of a lobby
#[derive(Debug, Clone)]
pub struct Heightmap {
    seed: i64,
    world_size: f64,
    base: Arc<HeightGrid>,
    overlay: Arc<HeightGrid>,
}

impl Heightmap {
    pub fn generate(seed: i64, settings: &TerrainSettings) -> Self {
        let mut base_noise = NoiseState::new(seed);
        let mut overlay_noise = NoiseState::new(seed.wrapping_add(OVERLAY_SEED_OFFSET));

        Self {
            seed,
            world_size: settings.world_size,
            base: Arc::new(generate_layer(settings.size, &settings.base, &mut base_noise)),
            overlay: Arc::new(generate_layer(
                settings.size,
                &settings.overlay,
                &mut overlay_noise,
            )),
        }
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    pub fn size(&self) -> usize {
        self.base.size()
    }

    pub fn base(&self) -> &Arc<HeightGrid> {
        &self.base
    }

    pub fn overlay(&self) -> &Arc<HeightGrid> {
        &self.overlay
    }

    /// Normalized terrain height at a world position (origin at map centre).
    /// Positions off the map are open water.
    pub fn height_at(&self, world_x: f64, world_z: f64) -> f32 {
        let size = self.size();
        if size == 0 || !(self.world_size > 0.0) {
            return 0.0;
        }

        let half = self.world_size / 2.0;
        let u = (world_x + half) / self.world_size;
        let v = (world_z + half) / self.world_size;
        if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
            return 0.0;
        }

        let col = ((u * size as f64) as usize).min(size - 1);
        let row = ((v * size as f64) as usize).min(size - 1);
        self.base.get(row, col) * self.overlay.get(row, col)
    }
}

/// Generate one layer: octave noise, then optional falloff and barrier
pub fn generate_layer(size: usize, config: &LayerConfig, noise: &mut NoiseState) -> HeightGrid {
    let mut layer = octave_noise(size, config, noise);

    if config.falloff {
        let falloff = falloff_map(size, config.falloff_strength, config.falloff_scale);
        layer = layer.zip_with(&falloff, |h, f| h - f);
    }

    if config.mountain_barrier {
        let barrier = barrier_map(size, config, noise);
        layer = layer.zip_with(&barrier, |h, b| h + b);
    }

    layer
}

/// Summed octaves, biased toward water and normalized into [0, 1]
pub fn octave_noise(size: usize, config: &LayerConfig, noise: &NoiseState) -> HeightGrid {
    let octaves = config.octaves.max(1);
    HeightGrid::from_fn(size, |row, col| {
        let nx = col as f64 / size as f64;
        let ny = row as f64 / size as f64;

        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut total = 0.0;
        let mut max_amplitude = 0.0;
        for _ in 0..octaves {
            let sx = nx * config.scale * frequency;
            let sy = ny * config.scale * frequency;
            total += noise.sample(sx, sy) * amplitude;
            max_amplitude += amplitude;
            amplitude *= config.persistence;
            frequency *= config.lacunarity;
        }

        total += SEA_BIAS;
        (total + max_amplitude) / (2.0 * max_amplitude)
    })
}

/// Chebyshev distance of a cell from the grid centre: 0 at centre, 1 on the border
pub fn edge_distance(size: usize, row: usize, col: usize) -> f64 {
    if size < 2 {
        return 0.0;
    }
    let span = (size - 1) as i64;
    let dx = (2 * col as i64 - span).abs() as f64 / span as f64;
    let dy = (2 * row as i64 - span).abs() as f64 / span as f64;
    dx.max(dy)
}

pub fn falloff_map(size: usize, strength: f64, scale: f64) -> HeightGrid {
    HeightGrid::from_fn(size, |row, col| {
        edge_distance(size, row, col).powf(strength) * scale
    })
}

/// Additive ridge hugging the map edge
pub fn barrier_map(size: usize, config: &LayerConfig, noise: &mut NoiseState) -> HeightGrid {
    let (offset_x, offset_y) = if config.barrier_noise {
        (
            noise.uniform() * BARRIER_OFFSET_RANGE,
            noise.uniform() * BARRIER_OFFSET_RANGE,
        )
    } else {
        (0.0, 0.0)
    };

    let width = config.barrier_width;
    let inner = (1.0 - width).clamp(0.0, 1.0);
    let noise = &*noise;

    HeightGrid::from_fn(size, |row, col| {
        let d = edge_distance(size, row, col);
        if !(width > 0.0) || d <= inner {
            return 0.0;
        }

        let t = ((d - inner) / width).clamp(0.0, 1.0);
        let mut ridge = t.powf(config.barrier_falloff) * config.barrier_height;

        if config.barrier_noise {
            let nx = col as f64 / size as f64 * config.barrier_noise_scale + offset_x;
            let ny = row as f64 / size as f64 * config.barrier_noise_scale + offset_y;
            ridge *= 0.75 + 0.25 * noise.sample(nx, ny);
        }

        ridge
    })
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
