use approx::assert_abs_diff_eq;
use candle_bnn::candle_core::{DType, Device, Tensor};
use candle_bnn::candle_nn::{Activation, Optimizer, VarMap, SGD};
use candle_bnn::vb::{itransform_w, make_posterior_full, transform_w};
use candle_bnn::*;

fn cpu_store(varmap: &VarMap) -> ParamStore {
    ParamStore::new(varmap, DType::F32, &Device::Cpu)
}

#[test]
fn prior_against_matching_posterior_has_zero_kl() -> Result<()> {
    let varmap = VarMap::new();
    let store = cpu_store(&varmap);

    let p = make_prior(&store.pp("p"), &[3, 2], 1.0)?;
    let q = IndependentGaussian::new(
        Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?,
        Tensor::new(1f32, &Device::Cpu)?,
    )?;

    let kl = kl_qp(&q.into(), &p.into())?;
    assert_eq!(kl.rank(), 0);
    assert_abs_diff_eq!(kl.to_scalar::<f32>()?, 0.0, epsilon = 1e-6);
    Ok(())
}

#[test]
fn dense_layer_on_five_samples() -> Result<()> {
    let varmap = VarMap::new();
    let mut seeds = SeedSequence::default();
    let layer = DenseVariational::new(4, &DenseConfig::new(2), &cpu_store(&varmap), &mut seeds)?;

    let x = Tensor::randn(0f32, 1f32, (5, 10, 4), &Device::Cpu)?;
    let out = layer.forward_kl(&x, &mut seeds)?;

    assert_eq!(out.net.dims(), &[5, 10, 2]);
    assert_eq!(out.kl.rank(), 0);
    assert!(out.kl.to_scalar::<f32>()? >= 0.0);
    Ok(())
}

#[test]
fn embedding_layer_on_index_column() -> Result<()> {
    let varmap = VarMap::new();
    let mut seeds = SeedSequence::default();
    let store = cpu_store(&varmap);
    let layer = EmbedVariational::new(&EmbedConfig::new(3, 5), &store.pp("embed"), &mut seeds)?;

    let x = Tensor::new(&[0u32, 1, 2, 3, 4, 0, 2], &Device::Cpu)?
        .to_dtype(DType::F32)?
        .reshape((1, 7, 1))?;
    let out = layer.forward_kl(&x, &mut seeds)?;
    assert_eq!(out.net.dims(), &[1, 7, 3]);

    let err = EmbedVariational::new(&EmbedConfig::new(3, 1), &store.pp("bad"), &mut seeds)
        .unwrap_err();
    assert!(matches!(err, BnnError::InvalidConfiguration(_)));
    Ok(())
}

#[test]
fn independent_posterior_against_full_prior_is_unsupported() -> Result<()> {
    let varmap = VarMap::new();
    let store = cpu_store(&varmap);
    let mut seeds = SeedSequence::default();

    let q = make_posterior_diagonal(&store.pp("q"), &[3, 2], 1.0, &mut seeds)?;
    let p = make_posterior_full(&store.pp("p"), (3, 2), 1.0, &mut seeds)?;

    assert!(matches!(
        kl_qp(&q.into(), &p.into()),
        Err(BnnError::NoDivergenceRule { .. })
    ));
    Ok(())
}

#[test]
fn weight_transform_round_trip() -> Result<()> {
    let w = Tensor::randn(0f32, 1f32, (6, 3), &Device::Cpu)?;
    let back = itransform_w(&transform_w(&w)?)?;
    assert_eq!(back.to_vec2::<f32>()?, w.to_vec2::<f32>()?);
    Ok(())
}

#[test]
fn stacked_network_sums_kl() -> Result<()> {
    let varmap = VarMap::new();
    let store = cpu_store(&varmap);
    let mut seeds = SeedSequence::new(7);

    let hidden = DenseVariational::new(3, &DenseConfig::new(5), &store.pp("l0"), &mut seeds)?;
    let output = DenseVariational::new(
        5,
        &DenseConfig {
            full: true,
            use_bias: false,
            ..DenseConfig::new(1)
        },
        &store.pp("l1"),
        &mut seeds,
    )?;
    let expected = hidden.kl()?.to_scalar::<f32>()? + output.kl()?.to_scalar::<f32>()?;

    let mut net = VariationalStack::new();
    net.push_with_act(hidden, Activation::Relu);
    net.push(output);

    let x = tile_samples(&Tensor::randn(0f32, 1f32, (8, 3), &Device::Cpu)?, 4)?;
    let out = net.forward_kl(&x, &mut seeds)?;

    assert_eq!(out.net.dims(), &[4, 8, 1]);
    assert_abs_diff_eq!(out.kl.to_scalar::<f32>()?, expected, epsilon = 1e-3);
    Ok(())
}

#[test]
fn optimizer_updates_reach_the_layer() -> Result<()> {
    let varmap = VarMap::new();
    let mut seeds = SeedSequence::default();
    let config = DenseConfig {
        full: true,
        ..DenseConfig::new(2)
    };
    let layer = DenseVariational::new(3, &config, &cpu_store(&varmap), &mut seeds)?;
    let kl_start = layer.kl()?.to_scalar::<f32>()?;

    let mut opt = SGD::new(varmap.all_vars(), 1e-4)?;
    let x = tile_samples(&Tensor::ones((4, 3), DType::F32, &Device::Cpu)?, 2)?;
    for _ in 0..50 {
        let out = layer.forward_kl(&x, &mut seeds)?;
        opt.backward_step(&out.kl)?;
    }
    let kl_end = layer.kl()?.to_scalar::<f32>()?;

    assert!(kl_end.is_finite());
    assert!(kl_end < kl_start);
    Ok(())
}
