use candle_core::{Device, Tensor};
use candle_nn::Optimizer;
use candle_util::candle_data_loader::InMemoryData;
use candle_util::candle_inference::TrainConfig;
use matrix_util::clustering_metrics::accuracy;
use matrix_util::dmatrix_io::*;
use matrix_util::traits::ConvertMatOps;
use rand::SeedableRng;
use std::collections::HashMap;
use vade::cluster_log::ClusterRecord;
use vade::evaluate::predict_all;
use vade::gmm_init::{mean_column_variance, DiagonalGmm};
use vade::mixture::*;
use vade::model::*;
use vade::responsibility::responsibility;
use vade::simulate::bernoulli_clusters;
use vade::train::*;

fn small_model(binary: bool) -> anyhow::Result<Vade> {
    let config = VadeConfig::new(12, 2, 3, binary).with_layers(&[32, 32], &[32, 32]);
    Vade::new(config, &Device::Cpu)
}

fn named_tensors(model: &Vade) -> anyhow::Result<HashMap<String, Tensor>> {
    let data = model
        .varmap()
        .data()
        .lock()
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(data
        .iter()
        .map(|(k, v)| (k.clone(), v.as_tensor().clone()))
        .collect())
}

/// 16 distinct binary rows of width 12
fn distinct_binary_rows() -> anyhow::Result<Tensor> {
    let values: Vec<f32> = (0..16usize)
        .flat_map(|i| {
            let code = (i * 251 + 7) % 4096;
            (0..12).map(move |j| ((code >> j) & 1) as f32)
        })
        .collect();
    Ok(Tensor::from_vec(values, (16, 12), &Device::Cpu)?)
}

/// Put the prior components on the codes of the first three rows
/// with variances well below the spread of the codes.
fn seed_prior_on_codes(model: &Vade, x: &Tensor) -> anyhow::Result<()> {
    let z_nd = DMatrix::<f64>::from_tensor(&model.embed(x)?)?;
    let means_kd = z_nd.rows(0, 3).into_owned();
    let spread = (0.05 * mean_column_variance(&z_nd)).max(1e-4);
    let variances_kd = DMatrix::<f64>::from_element(3, z_nd.ncols(), spread);
    model.mixture().assign(model.varmap(), &means_kd, &variances_kd)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> anyhow::Result<f32> {
    Ok((a - b)?.abs()?.max_all()?.to_scalar::<f32>()?)
}

#[test]
fn recovers_bernoulli_clusters() -> anyhow::Result<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let train = bernoulli_clusters(100, 8, 3, 0.95, &mut rng)?;
    let test = bernoulli_clusters(60, 8, 3, 0.95, &mut rng)?;

    let config = VadeConfig::new(8, 2, 3, true).with_layers(&[32, 32], &[32, 32]);
    let model = Vade::new(config, &Device::Cpu)?;
    let mut data = InMemoryData::new_with_labels(&train.data_nd, &train.labels)?;

    let config = TrainConfig {
        batch_size: 20,
        num_epochs: 50,
        num_pretrain_epochs: 100,
        eval_interval: 10,
        show_progress: false,
        ..TrainConfig::default()
    };

    let mut records: Vec<ClusterRecord> = vec![];
    let summary = fit(&model, &mut data, &DiagonalGmm::default(), &config, &mut records)?;

    assert_eq!(summary.pretrain_loss.len(), 100);
    assert_eq!(summary.loss_trace.len(), 50);
    assert!(summary.loss_trace.iter().all(|l| l.is_finite()));

    // epochs 0, 10, 20, 30, 40
    let epochs: Vec<usize> = records.iter().map(|r| r.epoch).collect();
    assert_eq!(epochs, vec![0, 10, 20, 30, 40]);
    assert_eq!(summary.records, records);

    let mut held_out = InMemoryData::new(&test.data_nd)?;
    let pred = predict_all(&model, &mut held_out, 25)?;
    assert_eq!(pred.gamma_nk.dims(), &[60, 3]);
    let acc = accuracy(&pred.membership, &test.labels)?;
    assert!(acc >= 0.85, "held-out accuracy {}", acc);
    Ok(())
}

#[test]
fn saved_model_predicts_the_same() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prefix = dir.path().join("run");
    let prefix = prefix.to_str().ok_or(anyhow::anyhow!("path"))?;

    let model = small_model(true)?;
    let x = distinct_binary_rows()?;
    seed_prior_on_codes(&model, &x)?;

    // one update moves the weights and the batch norm statistics
    let mut adam = build_optimizer(&model, 0.002)?;
    adam.backward_step(&model.loss(&x, true)?.loss)?;

    let before = model.predict(&x)?;
    let gamma = before.gamma_nk.to_vec2::<f32>()?;
    assert!(
        gamma.iter().any(|row| row.iter().any(|&g| g > 0.5)),
        "expected a peaked responsibility, got {:?}",
        gamma
    );

    model.save(prefix)?;
    let restored = Vade::load(prefix, &Device::Cpu)?;
    assert_eq!(restored.config(), model.config());

    let after = restored.predict(&x)?;
    assert_eq!(before.membership, after.membership);
    assert!(max_abs_diff(&before.gamma_nk, &after.gamma_nk)? < 1e-6);
    assert!(max_abs_diff(&model.embed(&x)?, &restored.embed(&x)?)? < 1e-6);
    assert!(
        max_abs_diff(
            &model.forward_t(&x, false)?.x_mean_nd,
            &restored.forward_t(&x, false)?.x_mean_nd
        )? < 1e-6
    );

    // a fresh model with its own weights does not reproduce the codes
    let fresh = small_model(true)?;
    assert!(max_abs_diff(&model.embed(&x)?, &fresh.embed(&x)?)? > 1e-4);
    Ok(())
}

#[test]
fn zero_learning_rate_keeps_the_prior() -> anyhow::Result<()> {
    let model = small_model(false)?;
    let before = model.mixture().view()?;

    let mut adam = build_optimizer(&model, 0.0)?;
    let x = Tensor::randn(0f32, 1f32, (10, 12), &Device::Cpu)?;
    let out = model.loss(&x, true)?;
    adam.backward_step(&out.loss)?;

    let after = model.mixture().view()?;
    assert_eq!(
        before.theta_k.to_vec1::<f32>()?,
        after.theta_k.to_vec1::<f32>()?
    );
    assert_eq!(
        before.u_dk.to_vec2::<f32>()?,
        after.u_dk.to_vec2::<f32>()?
    );
    Ok(())
}

#[test]
fn gamma_is_a_distribution_per_row() -> anyhow::Result<()> {
    let model = small_model(true)?;
    let x = distinct_binary_rows()?;
    seed_prior_on_codes(&model, &x)?;

    let pred = model.predict(&x)?;
    let gamma = pred.gamma_nk.to_vec2::<f32>()?;
    for row in gamma.iter() {
        assert!(row.iter().all(|&g| (0.0..=1.0).contains(&g)));
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    // away from 1/3 somewhere
    let uniform = 1.0 / 3.0;
    assert!(gamma
        .iter()
        .any(|row| row.iter().any(|&g| (g - uniform).abs() > 0.2)));

    // the hard call agrees with the soft one wherever it is clear
    for (row, &k) in gamma.iter().zip(pred.membership.iter()) {
        assert!(k < 3);
        if row.iter().any(|&g| g > 0.9) {
            assert!(row[k] > 0.9);
        }
    }
    Ok(())
}

#[test]
fn zero_variance_prior_is_rejected() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let theta = Tensor::new(&[0.5f32, 0.5], &dev)?;
    let u = Tensor::zeros((2, 2), candle_core::DType::F32, &dev)?;
    let lambda = Tensor::new(&[[1f32, 0.], [1., 1.]], &dev)?;
    assert!(GmmView::from_raw(&theta, &u, &lambda).is_err());

    let lambda = Tensor::ones((2, 2), candle_core::DType::F32, &dev)?;
    let view = GmmView::from_raw(&theta, &u, &lambda)?;
    let z = Tensor::new(&[[0f32, 0.]], &dev)?;
    let gamma = responsibility(&z, &view)?.to_vec2::<f32>()?;
    assert!((gamma[0][0] - 0.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn evaluation_mode_is_deterministic() -> anyhow::Result<()> {
    let model = small_model(true)?;
    let x = Tensor::rand(0f32, 1f32, (5, 12), &Device::Cpu)?.round()?;
    let fwd = model.forward_t(&x, false)?;
    assert_eq!(
        fwd.z_nd.to_vec2::<f32>()?,
        fwd.z_mean_nd.to_vec2::<f32>()?
    );
    assert_eq!(
        model.embed(&x)?.to_vec2::<f32>()?,
        fwd.z_mean_nd.to_vec2::<f32>()?
    );
    Ok(())
}

#[test]
fn loading_tolerates_extra_and_missing_names() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = small_model(true)?;
    let total = named_tensors(&source)?.len();

    // superset: every variable plus one unknown tensor
    let mut superset = named_tensors(&source)?;
    superset.insert(
        "unrelated.weight".to_string(),
        Tensor::ones(4, candle_core::DType::F32, &Device::Cpu)?,
    );
    let superset_file = dir.path().join("superset.safetensors");
    candle_core::safetensors::save(&superset, &superset_file)?;

    let target = small_model(true)?;
    let report = target.load_parameters(superset_file.to_str().unwrap_or_default())?;
    assert_eq!(report.loaded, total);
    assert_eq!(report.missing, 0);
    assert_eq!(report.skipped, 1);

    // subset: only the mixture prior
    let subset: HashMap<String, Tensor> = named_tensors(&source)?
        .into_iter()
        .filter(|(k, _)| k.starts_with("gmm."))
        .collect();
    let subset_file = dir.path().join("subset.safetensors");
    candle_core::safetensors::save(&subset, &subset_file)?;

    let target = small_model(true)?;
    let report = target.load_parameters(subset_file.to_str().unwrap_or_default())?;
    assert_eq!(report.loaded, 3);
    assert_eq!(report.missing, total - 3);
    assert_eq!(report.skipped, 0);

    let names = [THETA_LOGIT, MEAN, LN_VAR];
    let loaded = named_tensors(&target)?;
    for name in names {
        assert!(loaded.contains_key(name));
    }
    Ok(())
}
