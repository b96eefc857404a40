use crate::common_io::Delimiter;
use candle_core::{Device, Tensor};

/// Read and write a dense matrix as delimited text, one row per line
pub trait IoOps {
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, file: &str) -> anyhow::Result<()> {
        self.write_file_delim(file, "\t")
    }

    fn to_csv(&self, file: &str) -> anyhow::Result<()> {
        self.write_file_delim(file, ",")
    }
}

/// Reading off from `Tensor`
pub trait ConvertMatOps {
    type Mat;

    fn from_tensor(_: &Tensor) -> anyhow::Result<Self::Mat>;
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor>;
}
