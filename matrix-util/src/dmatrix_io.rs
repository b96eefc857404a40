use crate::common_io::{read_lines_of_types, write_types, Delimiter};
use crate::traits::*;
use candle_core::{DType, Device, Tensor};
pub use nalgebra::{DMatrix, DVector};
use num_traits::{FromPrimitive, ToPrimitive};

use std::fmt::Display;
use std::str::FromStr;

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Send + FromStr + Display + Copy,
    <T as FromStr>::Err: Display,
{
    type Mat = Self;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let data = read_lines_of_types::<T>(file, delim, skip.unwrap_or(0))?;

        if data.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", file));
        }

        let ncols = data[0].len();
        let nrows = data.len();

        if let Some((i, row)) = data.iter().enumerate().find(|(_, row)| row.len() != ncols) {
            return Err(anyhow::anyhow!(
                "{}: row {} has {} columns, expected {}",
                file,
                i + 1,
                row.len(),
                ncols
            ));
        }

        Ok(DMatrix::<T>::from_row_iterator(
            nrows,
            ncols,
            data.into_iter().flatten(),
        ))
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        // keep the row order; no par_iter here
        let lines = self
            .row_iter()
            .map(|row| {
                row.iter()
                    .map(|x| format!("{}", *x))
                    .collect::<Vec<String>>()
                    .join(delim)
            })
            .collect::<Vec<_>>();
        write_types(&lines, file)
    }
}

impl<T> ConvertMatOps for DMatrix<T>
where
    T: nalgebra::Scalar + FromPrimitive + ToPrimitive + Copy,
{
    type Mat = Self;

    /// `n x d` tensor to `n x d` matrix
    fn from_tensor(tensor: &Tensor) -> anyhow::Result<Self::Mat> {
        let rows = tensor
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?;
        let nrows = rows.len();
        let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
        let data = rows
            .into_iter()
            .flatten()
            .map(|x| T::from_f32(x).ok_or_else(|| anyhow::anyhow!("cannot convert {}", x)))
            .collect::<anyhow::Result<Vec<T>>>()?;
        Ok(DMatrix::<T>::from_row_iterator(nrows, ncols, data))
    }

    /// `n x d` matrix to `n x d` f32 tensor
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        let data = self
            .row_iter()
            .flat_map(|row| row.iter().map(|x| x.to_f32()).collect::<Vec<_>>())
            .map(|x| x.ok_or_else(|| anyhow::anyhow!("cannot convert to f32")))
            .collect::<anyhow::Result<Vec<f32>>>()?;
        Ok(Tensor::from_vec(data, (self.nrows(), self.ncols()), dev)?)
    }
}
