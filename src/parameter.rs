//! Parameter space and finite parameter samplings.
//!
//! A parameter is a fixed-size real vector living in a box domain
//! `D = [min_0, max_0] x ... x [min_{p-1}, max_{p-1}]`. Samplings are ordered
//! sequences of parameters; they can be drawn at random, spaced uniformly or
//! log-uniformly along the box diagonal, complemented against a selected
//! subsample, and read from or written to a plain-text file with one
//! parameter per line in the literal format `mu_i= [ v_0 , v_1 ]`.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Index;
use std::path::Path;

use faer::rand::Rng;
use faer::rand::rngs::StdRng;
use problemo::{Problem, ProblemResult};
use serde::{Deserialize, Serialize};

use crate::error::CrbError;
use crate::{E, I};

/// A point of the parameter domain. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter(Vec<E>);

impl Parameter {
    pub fn new(values: Vec<E>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> I {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.0
    }

    /// Lexicographic comparison with a deterministic outcome: the first
    /// coordinate that differs decides.
    fn lex_less(&self, other: &Parameter) -> bool {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            if a < b {
                return true;
            }
            if a > b {
                return false;
            }
        }
        false
    }
}

impl Index<I> for Parameter {
    type Output = E;

    fn index(&self, i: I) -> &E {
        &self.0[i]
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ ")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " , ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, " ]")
    }
}

/// The box domain `D` the parameters live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    min: Parameter,
    max: Parameter,
}

impl ParameterSpace {
    pub fn new(min: Vec<E>, max: Vec<E>) -> Self {
        assert_eq!(
            min.len(),
            max.len(),
            "parameter bounds must have the same dimension"
        );
        Self {
            min: Parameter::new(min),
            max: Parameter::new(max),
        }
    }

    pub fn dimension(&self) -> I {
        self.min.dimension()
    }

    pub fn min(&self) -> &Parameter {
        &self.min
    }

    pub fn max(&self) -> &Parameter {
        &self.max
    }

    pub fn contains(&self, mu: &Parameter) -> bool {
        mu.dimension() == self.dimension()
            && (0..self.dimension()).all(|d| self.min[d] <= mu[d] && mu[d] <= self.max[d])
    }

    /// Draws one parameter uniformly at random from the box.
    pub fn random_element(&self, rng: &mut StdRng) -> Parameter {
        let p = self.dimension();
        let mut values = Vec::with_capacity(p);
        for d in 0..p {
            let t: E = rng.random();
            values.push(self.min[d] + t * (self.max[d] - self.min[d]));
        }
        Parameter::new(values)
    }
}

/// Generation mode for a sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingMode {
    Random,
    LogEquidistributed,
    Equidistributed,
}

/// An ordered sequence of parameters, optionally linked to the super-sampling
/// it was extracted from through an index map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    points: Vec<Parameter>,
    /// For each point, its index in the super-sampling this sampling was
    /// built from (complement construction); `None` for root samplings.
    super_indices: Option<Vec<I>>,
}

impl Sampling {
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            super_indices: None,
        }
    }

    /// Generates a sampling of `size` points according to `mode`.
    ///
    /// Random mode draws each point uniformly in the box; the two
    /// equidistributed modes place points along the diagonal of the box with
    /// per-coordinate uniform (resp. log-uniform) spacing.
    pub fn generate(
        space: &ParameterSpace,
        mode: SamplingMode,
        size: I,
        rng: &mut StdRng,
    ) -> Self {
        let p = space.dimension();
        let mut points = Vec::with_capacity(size);
        match mode {
            SamplingMode::Random => {
                for _ in 0..size {
                    points.push(space.random_element(rng));
                }
            }
            SamplingMode::Equidistributed => {
                for i in 0..size {
                    let t = if size > 1 {
                        i as E / (size - 1) as E
                    } else {
                        0.0
                    };
                    let values = (0..p)
                        .map(|d| space.min()[d] + t * (space.max()[d] - space.min()[d]))
                        .collect();
                    points.push(Parameter::new(values));
                }
            }
            SamplingMode::LogEquidistributed => {
                for i in 0..size {
                    let t = if size > 1 {
                        i as E / (size - 1) as E
                    } else {
                        0.0
                    };
                    let values = (0..p)
                        .map(|d| {
                            let lo = space.min()[d].ln();
                            let hi = space.max()[d].ln();
                            (lo + t * (hi - lo)).exp()
                        })
                        .collect();
                    points.push(Parameter::new(values));
                }
            }
        }
        Self {
            points,
            super_indices: None,
        }
    }

    pub fn len(&self) -> I {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Indexed access. Out-of-bounds lookups are fatal.
    pub fn at(&self, i: I) -> &Parameter {
        &self.points[i]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.points.iter()
    }

    pub fn push(&mut self, mu: Parameter) {
        self.points.push(mu);
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.super_indices = None;
    }

    pub fn contains(&self, mu: &Parameter) -> bool {
        self.points.iter().any(|p| p == mu)
    }

    /// Index of the `i`-th point in the super-sampling, when this sampling
    /// was built as a complement. Falls back to `i` for root samplings.
    pub fn index_in_super_sampling(&self, i: I) -> I {
        match &self.super_indices {
            Some(map) => map[i],
            None => i,
        }
    }

    /// Set-difference against `selected`: every point of `self` that is not
    /// in `selected`, remembering its index in `self`.
    pub fn complement(&self, selected: &Sampling) -> Sampling {
        let mut points = Vec::new();
        let mut super_indices = Vec::new();
        for (i, mu) in self.points.iter().enumerate() {
            if !selected.contains(mu) {
                points.push(mu.clone());
                super_indices.push(i);
            }
        }
        Sampling {
            points,
            super_indices: Some(super_indices),
        }
    }

    /// Smallest parameter of the sampling under coordinate-wise lexicographic
    /// comparison; ties are broken by the lowest index. Fatal when empty.
    pub fn min(&self) -> (&Parameter, I) {
        assert!(!self.points.is_empty(), "min() on an empty sampling");
        let mut best = 0;
        for i in 1..self.points.len() {
            if self.points[i].lex_less(&self.points[best]) {
                best = i;
            }
        }
        (&self.points[best], best)
    }

    /// Largest parameter of the sampling; see [`Sampling::min`].
    pub fn max(&self) -> (&Parameter, I) {
        assert!(!self.points.is_empty(), "max() on an empty sampling");
        let mut best = 0;
        for i in 1..self.points.len() {
            if self.points[best].lex_less(&self.points[i]) {
                best = i;
            }
        }
        (&self.points[best], best)
    }

    /// Writes the sampling with one `mu_i= [ v , v ]` line per parameter.
    pub fn write_to_file(&self, path: &Path) -> Result<(), Problem> {
        let file = File::create(path).via(CrbError::database(format!(
            "cannot create sampling file {}",
            path.display()
        )))?;
        let mut out = BufWriter::new(file);
        for (i, mu) in self.points.iter().enumerate() {
            writeln!(out, "mu_{}= {}", i, mu).via(CrbError::database(format!(
                "cannot write sampling file {}",
                path.display()
            )))?;
        }
        Ok(())
    }

    /// Reads a sampling written by [`Sampling::write_to_file`]. An empty or
    /// unparsable file is a configuration error.
    pub fn read_from_file(path: &Path) -> Result<Self, Problem> {
        let file = File::open(path).via(CrbError::database(format!(
            "sampling file {} does not exist",
            path.display()
        )))?;
        let reader = BufReader::new(file);
        let mut points = Vec::new();
        for line in reader.lines() {
            let line = line.via(CrbError::database(format!(
                "cannot read sampling file {}",
                path.display()
            )))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            points.push(parse_parameter_line(trimmed, path)?);
        }
        if points.is_empty() {
            return Err(Problem::from(CrbError::configuration(
                "crb.use-predefined-WNmu",
                format!("sampling file {} is empty", path.display()),
            )));
        }
        Ok(Self {
            points,
            super_indices: None,
        })
    }
}

fn parse_parameter_line(line: &str, path: &Path) -> Result<Parameter, Problem> {
    let malformed = || {
        CrbError::database(format!(
            "malformed sampling line '{}' in {}",
            line,
            path.display()
        ))
    };
    let (_, rest) = line.split_once('=').ok_or_else(malformed)?;
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(malformed)?;
    let mut values = Vec::new();
    for token in inner.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let v: E = token.parse().map_err(|_| malformed())?;
        values.push(v);
    }
    if values.is_empty() {
        return Err(Problem::from(malformed()));
    }
    Ok(Parameter::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::rand::SeedableRng;
    use rstest::rstest;

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![0.1, 1.0], vec![10.0, 2.0])
    }

    #[rstest]
    #[case(SamplingMode::Random)]
    #[case(SamplingMode::Equidistributed)]
    #[case(SamplingMode::LogEquidistributed)]
    fn generated_points_stay_in_the_box(#[case] mode: SamplingMode) {
        let space = space();
        let mut rng = StdRng::seed_from_u64(7);
        let xi = Sampling::generate(&space, mode, 25, &mut rng);
        assert_eq!(xi.len(), 25);
        for mu in xi.iter() {
            assert!(space.contains(mu), "{} escapes the box", mu);
        }
    }

    #[test]
    fn equidistributed_endpoints_hit_the_bounds() {
        let space = space();
        let mut rng = StdRng::seed_from_u64(0);
        let xi = Sampling::generate(&space, SamplingMode::Equidistributed, 5, &mut rng);
        assert_eq!(xi.at(0), space.min());
        assert_eq!(xi.at(4), space.max());
    }

    #[test]
    fn log_spacing_is_geometric() {
        let space = ParameterSpace::new(vec![1.0], vec![16.0]);
        let mut rng = StdRng::seed_from_u64(0);
        let xi = Sampling::generate(&space, SamplingMode::LogEquidistributed, 5, &mut rng);
        for i in 0..5 {
            assert!((xi.at(i)[0] - 2.0f64.powi(i as i32)).abs() < 1e-12);
        }
    }

    #[test]
    fn complement_removes_selected_points_and_keeps_indices() {
        let space = space();
        let mut rng = StdRng::seed_from_u64(3);
        let xi = Sampling::generate(&space, SamplingMode::Equidistributed, 6, &mut rng);
        let mut selected = Sampling::empty();
        selected.push(xi.at(1).clone());
        selected.push(xi.at(4).clone());
        let complement = xi.complement(&selected);
        assert_eq!(complement.len(), 4);
        assert_eq!(complement.index_in_super_sampling(0), 0);
        assert_eq!(complement.index_in_super_sampling(1), 2);
        assert_eq!(complement.index_in_super_sampling(3), 5);
        for mu in complement.iter() {
            assert!(!selected.contains(mu));
        }
    }

    #[test]
    fn min_max_use_lexicographic_order() {
        let mut xi = Sampling::empty();
        xi.push(Parameter::new(vec![2.0, 0.0]));
        xi.push(Parameter::new(vec![1.0, 5.0]));
        xi.push(Parameter::new(vec![1.0, 3.0]));
        let (mu_min, i_min) = xi.min();
        assert_eq!(i_min, 2);
        assert_eq!(mu_min[1], 3.0);
        let (mu_max, i_max) = xi.max();
        assert_eq!(i_max, 0);
        assert_eq!(mu_max[0], 2.0);
    }

    #[test]
    fn min_breaks_ties_with_lowest_index() {
        let mut xi = Sampling::empty();
        xi.push(Parameter::new(vec![1.0]));
        xi.push(Parameter::new(vec![1.0]));
        let (_, index) = xi.min();
        assert_eq!(index, 0);
    }

    #[test]
    fn file_round_trip_preserves_the_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SamplingWNmu");
        let space = space();
        let mut rng = StdRng::seed_from_u64(11);
        let xi = Sampling::generate(&space, SamplingMode::Random, 8, &mut rng);
        xi.write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("mu_0= [ "));

        let reloaded = Sampling::read_from_file(&path).unwrap();
        assert_eq!(xi.len(), reloaded.len());
        for (a, b) in xi.iter().zip(reloaded.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn empty_sampling_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SamplingWNmu");
        std::fs::write(&path, "").unwrap();
        assert!(Sampling::read_from_file(&path).is_err());
    }
}
