use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use candle_util::candle_checkpoint::*;
use candle_util::candle_loss_functions::*;
use candle_util::candle_model_decoder::GaussianDecoder;
use candle_util::candle_model_encoder::*;
use candle_util::candle_model_traits::*;

fn build(varmap: &VarMap, dev: &Device) -> Result<(GaussianEncoder, GaussianDecoder)> {
    let vs = VarBuilder::from_varmap(varmap, DType::F32, dev);
    let enc = GaussianEncoder::new(10, 3, &[12, 6], Activation::Relu, 0.0, vs.clone())?;
    let dec = GaussianDecoder::new(10, 3, &[6, 12], Activation::Relu, 0.0, true, vs)?;
    Ok((enc, dec))
}

#[test]
fn encode_sample_decode() -> Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let (enc, dec) = build(&varmap, &dev)?;

    let x = Tensor::rand(0f32, 1f32, (8, 10), &dev)?.round()?;
    let (mu, lnvar) = enc.forward_t(&x, true)?;
    let z = reparameterize(&mu, &lnvar, true)?;
    let (p, _) = dec.forward_t(&z, true)?;
    let llik = bernoulli_log_likelihood(&x, &p)?;

    assert_eq!(llik.dims(), &[8]);
    for v in llik.to_vec1::<f32>()? {
        assert!(v.is_finite() && v <= 0.0);
    }
    Ok(())
}

#[test]
fn training_mode_samples_center_on_the_mean() -> Result<()> {
    let dev = Device::Cpu;
    let mu = Tensor::new(&[[1.5f32, -2.0f32]], &dev)?.repeat((20_000, 1))?;
    let lnvar = Tensor::new(&[[0f32, 1f32]], &dev)?.repeat((20_000, 1))?;
    let z = reparameterize(&mu, &lnvar, true)?;
    let zbar = z.mean(0)?.to_vec1::<f32>()?;
    assert!((zbar[0] - 1.5).abs() < 0.05);
    assert!((zbar[1] + 2.0).abs() < 0.05);
    Ok(())
}

#[test]
fn checkpoint_round_trip() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.safetensors");

    let x = Tensor::rand(0f32, 1f32, (4, 10), &dev)?;

    let varmap = VarMap::new();
    let (enc, _) = build(&varmap, &dev)?;
    let (mu, _) = enc.forward_t(&x, false)?;
    save_varmap(&varmap, &path)?;

    let other = VarMap::new();
    let (enc2, _) = build(&other, &dev)?;
    let report = load_varmap_lenient(&other, &path)?;
    assert_eq!(report.missing, 0);
    assert_eq!(report.skipped, 0);
    assert!(report.loaded > 0);

    let (mu2, _) = enc2.forward_t(&x, false)?;
    let diff = (mu - mu2)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert!(diff < 1e-6);
    Ok(())
}

#[test]
fn lenient_load_skips_and_keeps() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("partial.safetensors");

    let small = VarMap::new();
    let vs = VarBuilder::from_varmap(&small, DType::F32, &dev);
    vs.get_with_hints(3, "extra", candle_nn::Init::Const(1.0))?;
    vs.get_with_hints(5, "shared", candle_nn::Init::Const(2.0))?;
    save_varmap(&small, &path)?;

    let big = VarMap::new();
    let vs = VarBuilder::from_varmap(&big, DType::F32, &dev);
    let shared = vs.get_with_hints(5, "shared", candle_nn::Init::Const(0.0))?;
    let own = vs.get_with_hints(2, "own", candle_nn::Init::Const(7.0))?;

    let report = load_varmap_lenient(&big, &path)?;
    assert_eq!(
        report,
        LoadReport {
            loaded: 1,
            missing: 1,
            skipped: 1
        }
    );
    assert_eq!(shared.to_vec1::<f32>()?, vec![2.0; 5]);
    assert_eq!(own.to_vec1::<f32>()?, vec![7.0; 2]);
    Ok(())
}

#[test]
fn lenient_load_rejects_shape_change() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shape.safetensors");

    let a = VarMap::new();
    VarBuilder::from_varmap(&a, DType::F32, &dev).get_with_hints(4, "w", candle_nn::Init::Const(1.0))?;
    save_varmap(&a, &path)?;

    let b = VarMap::new();
    VarBuilder::from_varmap(&b, DType::F32, &dev).get_with_hints(3, "w", candle_nn::Init::Const(1.0))?;
    assert!(load_varmap_lenient(&b, &path).is_err());
    Ok(())
}
