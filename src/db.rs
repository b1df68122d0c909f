//! Persistence of the reduced-basis database.
//!
//! Two sibling files form one study: the primary archive holds the reduced
//! operator tables, the residual precomputations, the samplings and the
//! greedy bookkeeping; the basis archive holds the raw snapshot vectors,
//! keyed by the dimension it was written at. Both carry an explicit schema
//! version and named fields (JSON), so the on-disk footprint of the residual
//! tables is described rather than implicit. Reloading the primary archive
//! is sufficient for online queries; re-enrichment additionally needs the
//! basis archive and the truth model.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use faer::{Col, Mat};
use problemo::{Problem, ProblemResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::affine::{OperatorTable, VectorTable};
use crate::basis::ReducedBasis;
use crate::config::{CrbConfig, ErrorEstimationKind};
use crate::crb::{ConvergenceRecord, Crb};
use crate::error::CrbError;
use crate::model::TruthModel;
use crate::parameter::{Parameter, Sampling};
use crate::residual::{CouplingTable, ResidualTables, TermLayout};
use crate::{E, I};

pub const SCHEMA_VERSION: u32 = 1;

/// Locations of the two archive files of a study.
#[derive(Debug, Clone)]
pub struct DbPaths {
    stem: PathBuf,
}

impl DbPaths {
    /// `stem` is the common prefix; the primary archive lands at
    /// `<stem>.crb.json` and the basis archive at `<stem>.basis-N<n>.json`.
    pub fn new(stem: impl Into<PathBuf>) -> Self {
        Self { stem: stem.into() }
    }

    pub fn primary(&self) -> PathBuf {
        let mut path = self.stem.as_os_str().to_owned();
        path.push(".crb.json");
        PathBuf::from(path)
    }

    pub fn basis(&self, n: I) -> PathBuf {
        let mut path = self.stem.as_os_str().to_owned();
        path.push(format!(".basis-N{}.json", n));
        PathBuf::from(path)
    }

    pub fn exists(&self) -> bool {
        self.primary().exists()
    }

    /// Removes both archives (rebuild).
    pub fn wipe(&self) {
        let _ = std::fs::remove_file(self.primary());
        let parent = self
            .stem
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let Some(file_stem) = self.stem.file_name().map(|s| s.to_os_string()) else {
            return;
        };
        let mut prefix = file_stem;
        prefix.push(".basis-N");
        if let Ok(entries) = std::fs::read_dir(parent) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name
                    .to_string_lossy()
                    .starts_with(&*prefix.to_string_lossy())
                {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DenseVec {
    values: Vec<E>,
}

impl DenseVec {
    fn from_col(col: &Col<E>) -> Self {
        Self {
            values: (0..col.nrows()).map(|i| col[i]).collect(),
        }
    }

    fn to_col(&self) -> Col<E> {
        Col::from_fn(self.values.len(), |i| self.values[i])
    }
}

#[derive(Serialize, Deserialize)]
struct DenseMat {
    nrows: I,
    ncols: I,
    /// Row-major entries.
    values: Vec<E>,
}

impl DenseMat {
    fn from_mat(mat: &Mat<E>) -> Self {
        let (nrows, ncols) = (mat.nrows(), mat.ncols());
        let mut values = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            for j in 0..ncols {
                values.push(mat[(i, j)]);
            }
        }
        Self {
            nrows,
            ncols,
            values,
        }
    }

    fn to_mat(&self) -> Mat<E> {
        Mat::from_fn(self.nrows, self.ncols, |i, j| {
            self.values[i * self.ncols + j]
        })
    }
}

#[derive(Serialize, Deserialize)]
struct OperatorTableRecord {
    blocks: Vec<Vec<DenseMat>>,
}

impl OperatorTableRecord {
    fn from_table(table: &OperatorTable) -> Self {
        Self {
            blocks: table
                .blocks()
                .iter()
                .map(|row| row.iter().map(DenseMat::from_mat).collect())
                .collect(),
        }
    }

    fn to_table(&self) -> OperatorTable {
        OperatorTable::from_blocks(
            self.blocks
                .iter()
                .map(|row| row.iter().map(DenseMat::to_mat).collect())
                .collect(),
        )
    }
}

#[derive(Serialize, Deserialize)]
struct VectorTableRecord {
    blocks: Vec<Vec<DenseVec>>,
}

impl VectorTableRecord {
    fn from_table(table: &VectorTable) -> Self {
        Self {
            blocks: table
                .blocks()
                .iter()
                .map(|row| row.iter().map(DenseVec::from_col).collect())
                .collect(),
        }
    }

    fn to_table(&self) -> VectorTable {
        VectorTable::from_blocks(
            self.blocks
                .iter()
                .map(|row| row.iter().map(DenseVec::to_col).collect())
                .collect(),
        )
    }
}

#[derive(Serialize, Deserialize)]
struct CouplingRecord<T> {
    row_offsets: Vec<I>,
    col_offsets: Vec<I>,
    entries: Vec<T>,
}

impl CouplingRecord<E> {
    fn from_table(table: &CouplingTable<E>) -> Self {
        Self {
            row_offsets: table.rows.offsets().to_vec(),
            col_offsets: table.cols.offsets().to_vec(),
            entries: table.entries.clone(),
        }
    }

    fn to_table(&self) -> CouplingTable<E> {
        CouplingTable::from_parts(
            TermLayout::from_offsets(self.row_offsets.clone()),
            TermLayout::from_offsets(self.col_offsets.clone()),
            self.entries.clone(),
        )
    }
}

impl CouplingRecord<DenseVec> {
    fn from_vec_table(table: &CouplingTable<Col<E>>) -> Self {
        Self {
            row_offsets: table.rows.offsets().to_vec(),
            col_offsets: table.cols.offsets().to_vec(),
            entries: table.entries.iter().map(DenseVec::from_col).collect(),
        }
    }

    fn to_vec_table(&self) -> CouplingTable<Col<E>> {
        CouplingTable::from_parts(
            TermLayout::from_offsets(self.row_offsets.clone()),
            TermLayout::from_offsets(self.col_offsets.clone()),
            self.entries.iter().map(DenseVec::to_col).collect(),
        )
    }
}

impl CouplingRecord<DenseMat> {
    fn from_mat_table(table: &CouplingTable<Mat<E>>) -> Self {
        Self {
            row_offsets: table.rows.offsets().to_vec(),
            col_offsets: table.cols.offsets().to_vec(),
            entries: table.entries.iter().map(DenseMat::from_mat).collect(),
        }
    }

    fn to_mat_table(&self) -> CouplingTable<Mat<E>> {
        CouplingTable::from_parts(
            TermLayout::from_offsets(self.row_offsets.clone()),
            TermLayout::from_offsets(self.col_offsets.clone()),
            self.entries.iter().map(DenseMat::to_mat).collect(),
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ResidualRecord {
    c0_pr: CouplingRecord<E>,
    c0_du: CouplingRecord<E>,
    lambda_pr: CouplingRecord<DenseVec>,
    lambda_du: CouplingRecord<DenseVec>,
    gamma_pr: CouplingRecord<DenseMat>,
    gamma_du: CouplingRecord<DenseMat>,
    cmf_pr: CouplingRecord<DenseVec>,
    cmf_du: CouplingRecord<DenseVec>,
    cma_pr: CouplingRecord<DenseMat>,
    cma_du: CouplingRecord<DenseMat>,
    cmm_pr: CouplingRecord<DenseMat>,
    cmm_du: CouplingRecord<DenseMat>,
}

impl ResidualRecord {
    fn from_tables(tables: &ResidualTables) -> Self {
        Self {
            c0_pr: CouplingRecord::from_table(&tables.c0_pr),
            c0_du: CouplingRecord::from_table(&tables.c0_du),
            lambda_pr: CouplingRecord::from_vec_table(&tables.lambda_pr),
            lambda_du: CouplingRecord::from_vec_table(&tables.lambda_du),
            gamma_pr: CouplingRecord::from_mat_table(&tables.gamma_pr),
            gamma_du: CouplingRecord::from_mat_table(&tables.gamma_du),
            cmf_pr: CouplingRecord::from_vec_table(&tables.cmf_pr),
            cmf_du: CouplingRecord::from_vec_table(&tables.cmf_du),
            cma_pr: CouplingRecord::from_mat_table(&tables.cma_pr),
            cma_du: CouplingRecord::from_mat_table(&tables.cma_du),
            cmm_pr: CouplingRecord::from_mat_table(&tables.cmm_pr),
            cmm_du: CouplingRecord::from_mat_table(&tables.cmm_du),
        }
    }

    fn to_tables(&self) -> ResidualTables {
        ResidualTables {
            c0_pr: self.c0_pr.to_table(),
            c0_du: self.c0_du.to_table(),
            lambda_pr: self.lambda_pr.to_vec_table(),
            lambda_du: self.lambda_du.to_vec_table(),
            gamma_pr: self.gamma_pr.to_mat_table(),
            gamma_du: self.gamma_du.to_mat_table(),
            cmf_pr: self.cmf_pr.to_vec_table(),
            cmf_du: self.cmf_du.to_vec_table(),
            cma_pr: self.cma_pr.to_mat_table(),
            cma_du: self.cma_du.to_mat_table(),
            cmm_pr: self.cmm_pr.to_mat_table(),
            cmm_du: self.cmm_du.to_mat_table(),
        }
    }
}

/// The primary archive.
#[derive(Serialize, Deserialize)]
struct CrbDatabase {
    schema_version: u32,
    output_index: I,
    n: I,
    error_type: ErrorEstimationKind,
    use_newton: bool,
    convergence: Vec<(I, E, E, E)>,
    xi: Sampling,
    wnmu: Sampling,
    selection_indices: Vec<I>,
    mode_number: I,
    max_error: E,
    current_mu: Option<Parameter>,
    aqm_pr: OperatorTableRecord,
    aqm_du: OperatorTableRecord,
    aqm_pr_du: OperatorTableRecord,
    mqm_pr: OperatorTableRecord,
    mqm_du: OperatorTableRecord,
    mqm_pr_du: OperatorTableRecord,
    jqm_pr: OperatorTableRecord,
    fqm_pr: VectorTableRecord,
    fqm_du: VectorTableRecord,
    lqm_pr: VectorTableRecord,
    lqm_du: VectorTableRecord,
    rqm_pr: VectorTableRecord,
    initial_guess_pr: VectorTableRecord,
    gram_pr: DenseMat,
    coeff_pr_ini: Vec<E>,
    coeff_du_ini: Vec<E>,
    residual: ResidualRecord,
    has_variance_information: bool,
    variance_phi: Option<DenseMat>,
}

/// The sibling basis archive, keyed by the dimension it was written at.
#[derive(Serialize, Deserialize)]
struct BasisArchive {
    schema_version: u32,
    n: I,
    primal: Vec<DenseVec>,
    dual: Vec<DenseVec>,
}

/// Serialises the full engine state; the basis archive is keyed by the
/// current dimension.
pub fn save<M: TruthModel>(crb: &Crb<M>, paths: &DbPaths) -> Result<(), Problem> {
    let database = CrbDatabase {
        schema_version: SCHEMA_VERSION,
        output_index: crb.config.output_index,
        n: crb.n,
        error_type: crb.config.error_type,
        use_newton: crb.config.use_newton,
        convergence: crb
            .convergence
            .iter()
            .map(|(n, r)| (*n, r.max_error, r.delta_pr, r.delta_du))
            .collect(),
        xi: crb.xi.clone(),
        wnmu: crb.wnmu.clone(),
        selection_indices: crb.selection_indices.clone(),
        mode_number: crb.mode_number,
        max_error: crb.max_error,
        current_mu: crb.current_mu.clone(),
        aqm_pr: OperatorTableRecord::from_table(&crb.aqm_pr),
        aqm_du: OperatorTableRecord::from_table(&crb.aqm_du),
        aqm_pr_du: OperatorTableRecord::from_table(&crb.aqm_pr_du),
        mqm_pr: OperatorTableRecord::from_table(&crb.mqm_pr),
        mqm_du: OperatorTableRecord::from_table(&crb.mqm_du),
        mqm_pr_du: OperatorTableRecord::from_table(&crb.mqm_pr_du),
        jqm_pr: OperatorTableRecord::from_table(&crb.jqm_pr),
        fqm_pr: VectorTableRecord::from_table(&crb.fqm_pr),
        fqm_du: VectorTableRecord::from_table(&crb.fqm_du),
        lqm_pr: VectorTableRecord::from_table(&crb.lqm_pr),
        lqm_du: VectorTableRecord::from_table(&crb.lqm_du),
        rqm_pr: VectorTableRecord::from_table(&crb.rqm_pr),
        initial_guess_pr: VectorTableRecord::from_table(&crb.initial_guess_pr),
        gram_pr: DenseMat::from_mat(&crb.gram_pr),
        coeff_pr_ini: crb.coeff_pr_ini.clone(),
        coeff_du_ini: crb.coeff_du_ini.clone(),
        residual: ResidualRecord::from_tables(&crb.residual),
        has_variance_information: crb.variance_phi.is_some(),
        variance_phi: crb.variance_phi.as_ref().map(DenseMat::from_mat),
    };

    write_json(&paths.primary(), &database)?;

    let basis = BasisArchive {
        schema_version: SCHEMA_VERSION,
        n: crb.n,
        primal: collect_basis(&crb.basis_pr),
        dual: collect_basis(&crb.basis_du),
    };
    write_json(&paths.basis(crb.n), &basis)?;

    info!(
        target: "certrb::db",
        "database saved at N = {} ({})", crb.n, paths.primary().display()
    );
    Ok(())
}

/// Reloads an engine from disk. The configuration must agree with the
/// persisted flags (the Newton flag in particular); a schema mismatch is
/// fatal unless the rebuild option is set, in which case the caller should
/// not call `load` at all.
pub fn load<M: TruthModel>(
    model: M,
    config: CrbConfig,
    paths: &DbPaths,
) -> Result<Crb<M>, Problem> {
    let database: CrbDatabase = read_json(&paths.primary())?;
    if database.schema_version != SCHEMA_VERSION {
        return Err(Problem::from(CrbError::database(format!(
            "schema version {} found, {} expected; enable crb.rebuild-database",
            database.schema_version, SCHEMA_VERSION
        ))));
    }
    if database.use_newton != config.use_newton {
        return Err(Problem::from(CrbError::configuration(
            "crb.use-newton",
            "the Newton flag disagrees with the persisted database",
        )));
    }
    if database.error_type != config.error_type {
        return Err(Problem::from(CrbError::configuration(
            "crb.error-type",
            "the error type disagrees with the persisted database",
        )));
    }
    if database.output_index != config.output_index {
        return Err(Problem::from(CrbError::configuration(
            "crb.output-index",
            "the output index disagrees with the persisted database",
        )));
    }

    let basis: BasisArchive = read_json(&paths.basis(database.n))?;
    if basis.n != database.n {
        return Err(Problem::from(CrbError::database(format!(
            "basis archive keyed at N = {} does not match the database N = {}",
            basis.n, database.n
        ))));
    }

    let mut crb = Crb::new(model, config)?;
    crb.n = database.n;
    crb.max_error = database.max_error;
    crb.current_mu = database.current_mu;
    crb.mode_number = database.mode_number;
    crb.selection_indices = database.selection_indices;
    crb.xi = database.xi;
    crb.wnmu = database.wnmu;
    crb.convergence = database
        .convergence
        .iter()
        .map(|(n, max_error, delta_pr, delta_du)| {
            (
                *n,
                ConvergenceRecord {
                    max_error: *max_error,
                    delta_pr: *delta_pr,
                    delta_du: *delta_du,
                },
            )
        })
        .collect::<BTreeMap<_, _>>();
    crb.aqm_pr = database.aqm_pr.to_table();
    crb.aqm_du = database.aqm_du.to_table();
    crb.aqm_pr_du = database.aqm_pr_du.to_table();
    crb.mqm_pr = database.mqm_pr.to_table();
    crb.mqm_du = database.mqm_du.to_table();
    crb.mqm_pr_du = database.mqm_pr_du.to_table();
    crb.jqm_pr = database.jqm_pr.to_table();
    crb.fqm_pr = database.fqm_pr.to_table();
    crb.fqm_du = database.fqm_du.to_table();
    crb.lqm_pr = database.lqm_pr.to_table();
    crb.lqm_du = database.lqm_du.to_table();
    crb.rqm_pr = database.rqm_pr.to_table();
    crb.initial_guess_pr = database.initial_guess_pr.to_table();
    crb.gram_pr = database.gram_pr.to_mat();
    crb.coeff_pr_ini = database.coeff_pr_ini;
    crb.coeff_du_ini = database.coeff_du_ini;
    crb.residual = database.residual.to_tables();
    crb.variance_phi = database.variance_phi.as_ref().map(DenseMat::to_mat);

    let mut basis_pr = ReducedBasis::new();
    for v in &basis.primal {
        basis_pr.push(v.to_col());
    }
    let mut basis_du = ReducedBasis::new();
    for v in &basis.dual {
        basis_du.push(v.to_col());
    }
    crb.basis_pr = basis_pr;
    crb.basis_du = basis_du;

    info!(
        target: "certrb::db",
        "database loaded at N = {} ({})", crb.n, paths.primary().display()
    );
    Ok(crb)
}

fn collect_basis(basis: &ReducedBasis) -> Vec<DenseVec> {
    (0..basis.len())
        .map(|i| DenseVec {
            values: (0..basis.at(i).nrows()).map(|k| basis.at(i)[k]).collect(),
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Problem> {
    let file = File::create(path).via(CrbError::database(format!(
        "cannot create {}",
        path.display()
    )))?;
    serde_json::to_writer(BufWriter::new(file), value).via(CrbError::database(format!(
        "cannot serialise {}",
        path.display()
    )))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, Problem> {
    let file = File::open(path).via(CrbError::database(format!(
        "database {} is missing or unreadable",
        path.display()
    )))?;
    serde_json::from_reader(BufReader::new(file)).via(CrbError::database(format!(
        "cannot parse {}",
        path.display()
    )))
}
