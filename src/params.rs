use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::model::ArgModel;

/// On-disk form of the model parameters. Only the constructor inputs are
/// stored; derived arrays (grid points, time steps) are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgParamsFile {
    pub ntimes: usize,
    pub maxtime: f64,
    pub delta: f64,
    pub popsizes: Vec<f64>,
    pub rho: f64,
    pub mu: f64,
}

pub fn save_params(path: &Path, params: &ArgParamsFile) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, params)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_params(path: &Path) -> Result<ArgParamsFile> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let params =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(params)
}

impl ArgModel {
    pub fn save_params(&self, path: &Path) -> Result<()> {
        let params = ArgParamsFile {
            ntimes: self.ntimes,
            maxtime: self.maxtime,
            delta: self.delta,
            popsizes: self.popsizes.clone(),
            rho: self.rho,
            mu: self.mu,
        };
        save_params(path, &params)
    }

    pub fn load(path: &Path) -> Result<ArgModel> {
        let params = load_params(path)?;
        ArgModel::with_popsizes(
            params.ntimes,
            params.maxtime,
            params.delta,
            params.popsizes,
            params.rho,
            params.mu,
        )
    }
}
