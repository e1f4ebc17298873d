//! Seeded noise engine
//!
//! A Park-Miller linear-congruential generator shuffles a 256-entry
//! permutation table which drives 2D simplex gradient noise. A second
//! generator, keyed by an offset seed, provides a uniform stream for terrain
//! decoration. Only integer arithmetic and IEEE basic operations are used, so
//! the output is identical on every platform.

/// Park-Miller modulus (2^31 - 1)
pub const LCG_MODULUS: i64 = 2_147_483_647;
/// Park-Miller multiplier
pub const LCG_MULTIPLIER: i64 = 16_807;
/// Offset applied to the seed of the decoration stream
pub const DECORATION_SEED_OFFSET: i64 = 7_919;

/// Skew factor for the 2D simplex lattice: (sqrt(3) - 1) / 2
const F2: f64 = 0.366_025_403_784_438_6;
/// Unskew factor for the 2D simplex lattice: (3 - sqrt(3)) / 6
const G2: f64 = 0.211_324_865_405_187_1;
/// Scales the summed corner contributions to roughly [-1, 1]
const OUTPUT_SCALE: f64 = 70.0;

/// The twelve edge gradients of a cube, projected onto the XY plane
const GRADIENTS: [[f64; 2]; 12] = [
    [1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [-1.0, -1.0],
    [1.0, 0.0],
    [-1.0, 0.0],
    [1.0, 0.0],
    [-1.0, 0.0],
    [0.0, 1.0],
    [0.0, -1.0],
    [0.0, 1.0],
    [0.0, -1.0],
];

/// Map any integer seed into the generator's valid range `1..LCG_MODULUS`
pub fn normalize_seed(seed: i64) -> i64 {
    let s = seed.rem_euclid(LCG_MODULUS);
    if s == 0 {
        LCG_MODULUS - 1
    } else {
        s
    }
}

/// Minimal standard LCG (multiplier 16807, modulus 2^31 - 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcg {
    state: i64,
}

impl Lcg {
    pub fn new(seed: i64) -> Self {
        Self {
            state: normalize_seed(seed),
        }
    }

    /// Advance and return the raw state in `1..LCG_MODULUS`
    pub fn next_raw(&mut self) -> i64 {
        self.state = self.state * LCG_MULTIPLIER % LCG_MODULUS;
        self.state
    }

    /// Advance and return a value in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_raw() - 1) as f64 / (LCG_MODULUS - 1) as f64
    }
}

/// Deterministic noise generator keyed by an integer seed
#[derive(Debug, Clone)]
pub struct NoiseState {
    seed: i64,
    perm: [u8; 512],
    perm_mod12: [u8; 512],
    decoration: Lcg,
}

impl NoiseState {
    pub fn new(seed: i64) -> Self {
        let (perm, perm_mod12) = build_permutation(seed);
        Self {
            seed,
            perm,
            perm_mod12,
            decoration: Lcg::new(seed.wrapping_add(DECORATION_SEED_OFFSET)),
        }
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// Reset both the permutation table and the decoration stream
    pub fn reseed(&mut self, seed: i64) {
        *self = Self::new(seed);
    }

    /// Next value of the decoration stream, in [0, 1)
    pub fn uniform(&mut self) -> f64 {
        self.decoration.next_f64()
    }

    /// 2D simplex noise, approximately in [-1, 1]
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        // Skew input space to find the containing simplex cell
        let s = (x + y) * F2;
        let i = (x + s).floor();
        let j = (y + s).floor();

        let t = (i + j) * G2;
        let x0 = x - (i - t);
        let y0 = y - (j - t);

        // Lower or upper triangle of the cell; ties go to the upper one
        let (i1, j1) = if x0 > y0 { (1usize, 0usize) } else { (0, 1) };

        let x1 = x0 - i1 as f64 + G2;
        let y1 = y0 - j1 as f64 + G2;
        let x2 = x0 - 1.0 + 2.0 * G2;
        let y2 = y0 - 1.0 + 2.0 * G2;

        let ii = (i as i64 & 255) as usize;
        let jj = (j as i64 & 255) as usize;

        let gi0 = self.perm_mod12[ii + self.perm[jj] as usize];
        let gi1 = self.perm_mod12[ii + i1 + self.perm[jj + j1] as usize];
        let gi2 = self.perm_mod12[ii + 1 + self.perm[jj + 1] as usize];

        let n0 = corner_contribution(gi0, x0, y0);
        let n1 = corner_contribution(gi1, x1, y1);
        let n2 = corner_contribution(gi2, x2, y2);

        OUTPUT_SCALE * (n0 + n1 + n2)
    }
}

fn build_permutation(seed: i64) -> ([u8; 512], [u8; 512]) {
    let mut lcg = Lcg::new(seed);
    let mut p: [u8; 256] = std::array::from_fn(|i| i as u8);

    // Fisher-Yates, high index first
    for i in (1..256).rev() {
        let j = (lcg.next_f64() * (i + 1) as f64) as usize;
        p.swap(i, j);
    }

    let perm: [u8; 512] = std::array::from_fn(|i| p[i & 255]);
    let perm_mod12: [u8; 512] = std::array::from_fn(|i| perm[i] % 12);
    (perm, perm_mod12)
}

fn corner_contribution(gradient: u8, x: f64, y: f64) -> f64 {
    let t = 0.5 - x * x - y * y;
    if t < 0.0 {
        return 0.0;
    }
    let g = GRADIENTS[gradient as usize];
    let t2 = t * t;
    t2 * t2 * (g[0] * x + g[1] * y)
}
