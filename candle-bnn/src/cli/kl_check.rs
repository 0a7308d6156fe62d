use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::VarMap;
use clap::{Args, ValueEnum};
use log::info;

use crate::layers::{tile_samples, DenseConfig, DenseVariational, VariationalLayer};
use crate::params::ParamStore;
use crate::random::{randn_tensor, SeedSequence, SeedSource, DEFAULT_SEED};

/// Compute device selection.
#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device` from this enum.
    pub fn to_device(&self, device_no: usize) -> Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

#[derive(Args, Debug)]
pub struct KlCheckArgs {
    #[arg(long, default_value = "4", help = "Input dimension of the dense layer")]
    pub input_dim: usize,

    #[arg(long, default_value = "2", help = "Output dimension of the dense layer")]
    pub output_dim: usize,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = vec![1, 5, 20],
        help = "Ensemble sizes to evaluate (comma separated)"
    )]
    pub n_samples: Vec<usize>,

    #[arg(long, default_value = "16", help = "Rows in the random input batch")]
    pub batch: usize,

    #[arg(long, default_value = "1.0", help = "Initial prior/posterior variance")]
    pub reg: f64,

    #[arg(long, help = "Full-covariance weight posterior")]
    pub full: bool,

    #[arg(long, help = "Drop the bias term")]
    pub no_bias: bool,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    #[arg(long, value_enum, default_value = "cpu")]
    pub device: ComputeDevice,

    #[arg(long, default_value = "0")]
    pub device_no: usize,
}

/// One layer evaluation.
#[derive(Debug, Clone)]
pub struct KlReport {
    pub n_samples: usize,
    pub output_shape: Vec<usize>,
    pub kl: f32,
}

/// Evaluate one dense layer at every requested ensemble size.
pub fn evaluate(args: &KlCheckArgs, device: &Device) -> Result<Vec<KlReport>> {
    if args.n_samples.iter().any(|&n| n == 0) {
        anyhow::bail!("--n-samples values must be positive");
    }

    let varmap = VarMap::new();
    let store = ParamStore::new(&varmap, DType::F32, device);
    let mut seeds = SeedSequence::new(args.seed);

    let config = DenseConfig {
        reg: args.reg,
        full: args.full,
        use_bias: !args.no_bias,
        ..DenseConfig::new(args.output_dim)
    };
    let layer = DenseVariational::new(args.input_dim, &config, &store.pp("dense"), &mut seeds)?;
    info!(
        "dense {} -> {} with {} parameter tensors",
        args.input_dim,
        args.output_dim,
        varmap.all_vars().len()
    );

    let x = randn_tensor(
        (args.batch, args.input_dim),
        1.0,
        seeds.next_seed(),
        DType::F32,
        device,
    )?;

    let mut reports = Vec::with_capacity(args.n_samples.len());
    for &n_samples in args.n_samples.iter() {
        let out = layer.forward_kl(&tile_samples(&x, n_samples)?, &mut seeds)?;
        let report = KlReport {
            n_samples,
            output_shape: out.net.dims().to_vec(),
            kl: out.kl.to_scalar::<f32>()?,
        };
        info!(
            "n_samples = {:>4}, output {:?}, KL = {:.6}",
            report.n_samples, report.output_shape, report.kl
        );
        reports.push(report);
    }
    Ok(reports)
}

pub fn run(args: &KlCheckArgs) -> Result<()> {
    let device = args.device.to_device(args.device_no)?;
    info!("Using device: {:?}", device);

    let reports = evaluate(args, &device)?;

    if let Some(first) = reports.first() {
        let spread = reports
            .iter()
            .map(|r| (r.kl - first.kl).abs())
            .fold(0f32, f32::max);
        info!("max KL difference across ensemble sizes: {:.3e}", spread);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use approx::assert_abs_diff_eq;
    use clap::Parser;

    fn parse(argv: &[&str]) -> KlCheckArgs {
        match Cli::parse_from(argv).command {
            Commands::KlCheck(args) => args,
        }
    }

    #[test]
    fn test_parse_defaults() {
        let args = parse(&["candle-bnn", "kl-check"]);
        assert_eq!(args.n_samples, vec![1, 5, 20]);
        assert_eq!(args.seed, DEFAULT_SEED);
        assert_eq!(args.device, ComputeDevice::Cpu);
        assert!(!args.full);
    }

    #[test]
    fn test_kl_is_invariant() -> Result<()> {
        let args = parse(&[
            "candle-bnn",
            "kl-check",
            "--input-dim",
            "3",
            "--output-dim",
            "2",
            "--n-samples",
            "1,4",
            "--full",
        ]);
        let reports = evaluate(&args, &Device::Cpu)?;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].output_shape, vec![1, 16, 2]);
        assert_eq!(reports[1].output_shape, vec![4, 16, 2]);
        assert_abs_diff_eq!(reports[0].kl, reports[1].kl, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_zero_samples_rejected() {
        let args = parse(&["candle-bnn", "kl-check", "--n-samples", "0"]);
        assert!(evaluate(&args, &Device::Cpu).is_err());
    }
}
