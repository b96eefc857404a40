use candle_core::Device;
use clap::ValueEnum;
use log::info;
use matrix_util::common_io::delimiter_for;
use matrix_util::dmatrix_io::*;
use matrix_util::traits::IoOps;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(&self) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(0)?,
            ComputeDevice::Cuda => Device::new_cuda(0)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

/// Read a sample x feature matrix
pub fn read_data_file(file: &str) -> anyhow::Result<DMatrix<f32>> {
    let x_nd = DMatrix::<f32>::read_file_delim(file, delimiter_for(file), None)?;
    info!("Read {} x {} data from {}", x_nd.nrows(), x_nd.ncols(), file);
    Ok(x_nd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;

    #[test]
    fn cpu_matmul_on_the_selected_backend() -> anyhow::Result<()> {
        // with `accelerate` on, this goes through the framework's gemm
        let dev = ComputeDevice::Cpu.to_device()?;
        assert!(dev.is_cpu());
        let a = Tensor::new(&[[1f32, 2.], [3., 4.]], &dev)?;
        let b = Tensor::new(&[[0f32, 1.], [1., 0.]], &dev)?;
        assert_eq!(a.matmul(&b)?.to_vec2::<f32>()?, vec![vec![2., 1.], vec![4., 3.]]);
        Ok(())
    }
}
