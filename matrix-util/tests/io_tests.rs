use candle_core::Device;
use matrix_util::common_io::{create_temp_dir_file, delimiter_for};
use matrix_util::traits::{ConvertMatOps, IoOps};
use nalgebra::DMatrix;
use rand_distr::{Distribution, Uniform};

fn runif(nrows: usize, ncols: usize) -> DMatrix<f32> {
    let unif = Uniform::new(0_f32, 1_f32).expect("unif");
    let mut rng = rand::rng();
    DMatrix::from_fn(nrows, ncols, |_, _| unif.sample(&mut rng))
}

#[test]
fn dmatrix_io_test() -> anyhow::Result<()> {
    let xx = runif(50, 20);

    let tsv_file = create_temp_dir_file(".tsv.gz")?;
    let tsv_file = tsv_file.to_str().unwrap();
    xx.to_tsv(tsv_file)?;

    let yy = DMatrix::<f32>::read_file_delim(tsv_file, delimiter_for(tsv_file), None)?;

    approx::assert_abs_diff_eq!(xx, yy);

    Ok(())
}

#[test]
fn dmatrix_csv_with_header_test() -> anyhow::Result<()> {
    let xx = runif(7, 3);

    let csv_file = create_temp_dir_file(".csv")?;
    let csv_file = csv_file.to_str().unwrap();
    xx.to_csv(csv_file)?;

    let yy = DMatrix::<f32>::read_file_delim(csv_file, ",", Some(1))?;
    assert_eq!(yy.nrows(), 6);
    approx::assert_abs_diff_eq!(xx.rows(1, 6).into_owned(), yy);

    Ok(())
}

#[test]
fn ragged_rows_are_rejected() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".tsv")?;
    let file = file.to_str().unwrap();
    matrix_util::common_io::write_types(&["1\t2\t3", "4\t5"], file)?;
    assert!(DMatrix::<f32>::read_file_delim(file, "\t", None).is_err());
    Ok(())
}

#[test]
fn tensor_conversion_test() -> anyhow::Result<()> {
    let xx = runif(5, 4);
    let tt = xx.to_tensor(&Device::Cpu)?;
    assert_eq!(tt.dims(), &[5, 4]);
    let yy = DMatrix::<f32>::from_tensor(&tt)?;
    approx::assert_abs_diff_eq!(xx, yy);

    let zz = DMatrix::<f64>::from_tensor(&tt)?;
    approx::assert_abs_diff_eq!(zz[(2, 3)], xx[(2, 3)] as f64);
    Ok(())
}
