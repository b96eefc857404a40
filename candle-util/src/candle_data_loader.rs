use candle_core::{Device, Tensor};
use nalgebra::DMatrix;
use rand::prelude::SliceRandom;
use rayon::prelude::*;

pub struct MinibatchData {
    pub input: Tensor,
    pub labels: Option<Vec<usize>>,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn num_data(&self) -> usize;

    fn dim_obs(&self) -> usize;

    /// Randomly partition samples into minibatches
    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;

    /// Partition samples into minibatches keeping their order
    fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A simple data loader for in-memory 2d matrix.  Each row will be
/// considered as a feature vector. The number of samples is the
/// number of rows. Labels, if any, ride along for monitoring.
///
pub struct InMemoryData {
    input_data: Vec<Tensor>,
    labels: Option<Vec<usize>>,
    dim_obs: usize,
    minibatches: Minibatches,
}

impl InMemoryData {
    ///
    /// Create a data loader with the main data tensor `data`
    ///
    pub fn new<D>(data: &D) -> anyhow::Result<Self>
    where
        D: RowsToTensorVec,
    {
        let input_data = data.rows_to_tensor_vec()?;
        let dim_obs = match input_data.first() {
            Some(x) => x.dim(1)?,
            None => anyhow::bail!("empty data"),
        };
        let minibatches = Minibatches::new(input_data.len());

        Ok(InMemoryData {
            input_data,
            labels: None,
            dim_obs,
            minibatches,
        })
    }

    /// Create a data loader with the main `data` and one label per
    /// row
    pub fn new_with_labels<D>(data: &D, labels: &[usize]) -> anyhow::Result<Self>
    where
        D: RowsToTensorVec,
    {
        let mut ret = Self::new(data)?;
        if labels.len() != ret.input_data.len() {
            anyhow::bail!(
                "{} labels for {} samples",
                labels.len(),
                ret.input_data.len()
            );
        }
        ret.labels = Some(labels.to_vec());
        Ok(ret)
    }
}

impl DataLoader for InMemoryData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let samples = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                self.num_minibatch()
            )
        })?;

        let chunk: Vec<Tensor> = samples
            .iter()
            .map(|&i| self.input_data[i].clone())
            .collect();
        let input = Tensor::cat(&chunk, 0)?.to_device(target_device)?;

        let labels = self
            .labels
            .as_ref()
            .map(|y| samples.iter().map(|&i| y[i]).collect());

        Ok(MinibatchData { input, labels })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn num_data(&self) -> usize {
        self.input_data.len()
    }

    fn dim_obs(&self) -> usize {
        self.dim_obs
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.minibatches.shuffle_minibatch(batch_size)
    }

    fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.minibatches.ordered_minibatch(batch_size)
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
/// A trailing chunk of a single sample is merged into the previous
/// one since batch normalization needs at least two rows.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        let mut order = self.samples.clone();
        order.shuffle(&mut rand::rng());
        self.chunks = partition(&order, batch_size)?;
        Ok(())
    }

    pub fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.chunks = partition(&self.samples, batch_size)?;
        Ok(())
    }
}

fn partition(order: &[usize], batch_size: usize) -> anyhow::Result<Vec<Vec<usize>>> {
    if batch_size == 0 {
        anyhow::bail!("batch size must be positive");
    }

    let mut chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(|c| c.to_vec()).collect();

    if chunks.len() > 1 && chunks.last().is_some_and(|c| c.len() == 1) {
        if let Some(last) = chunks.pop() {
            if let Some(prev) = chunks.last_mut() {
                prev.extend(last);
            }
        }
    }
    Ok(chunks)
}

///
/// Convert rows of a matrix to a vector of `Tensor`
///
pub trait RowsToTensorVec {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>>;
}

impl RowsToTensorVec for DMatrix<f32> {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        let mut idx_data = self
            .row_iter()
            .enumerate()
            .par_bridge()
            .map(|(i, row)| {
                let v = Tensor::from_iter(row.iter().copied(), &Device::Cpu)?
                    .reshape((1, row.len()))?;
                Ok((i, v))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        idx_data.sort_by_key(|(i, _)| *i);
        Ok(idx_data.into_iter().map(|(_, t)| t).collect())
    }
}
