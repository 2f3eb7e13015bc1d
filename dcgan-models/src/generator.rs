use crate::config::DcganConfig;
use crate::params::Parameter;

use dcgan_core::backends::Padding;
use dcgan_core::graph::{ops, Output, Scope};
use dcgan_core::{nn, Error, Result};

/// Maps normal noise to a batch of `[image_size, image_size, num_channels]`
/// images through one dense layer and three transposed convolutions.
#[derive(Debug, Clone)]
pub struct Generator {
    pub w1: Parameter,
    pub filter1: Parameter,
    pub filter2: Parameter,
    pub filter3: Parameter,
    pub noise: Output,
    pub output: Output,
}

impl Generator {
    pub fn new(scope: &Scope, config: &DcganConfig, batch_size: usize) -> Result<Self> {
        config.validate()?;
        if batch_size == 0 {
            return Err(Error::InvalidArgument { op: "Generator", message: "batch size must be positive".into() });
        }

        let s = config.base_size();
        let k = config.kernel_size;
        let alpha = config.leaky_relu_alpha;

        let noise_shape = ops::shape_const(scope, &[batch_size, config.noise_dim])?;
        let noise = ops::random_normal(&scope.with_op_name("noise"), noise_shape)?;

        // dense
        let dense_scope = scope.with_name("dense");
        let w1_init = {
            let dims = ops::shape_const(&dense_scope, &[config.noise_dim, config.units()])?;
            let normal = ops::random_normal(&dense_scope, dims)?;
            ops::mul(&dense_scope, normal, ops::scalar(&dense_scope, config.dense_init_stddev)?)?
        };
        let w1 = Parameter::new(&dense_scope, "w1", w1_init)?;
        let dense = ops::matmul(&dense_scope, noise, w1.variable)?;

        let bn = {
            let bn_scope = dense_scope.with_name("batchnorm");
            let mean = ops::scalar(&bn_scope, 0.0)?;
            let variance = ops::scalar(&bn_scope, 1.0)?;
            let offset = ops::scalar(&bn_scope, 0.0)?;
            let scale = ops::scalar(&bn_scope, 1.0)?;
            let epsilon = ops::scalar(&bn_scope, config.batch_norm_epsilon)?;
            nn::batch_normalization(&bn_scope, dense, mean, variance, offset, scale, epsilon)?
        };
        let act = ops::leaky_relu(&dense_scope, bn, alpha)?;
        let reshaped = ops::reshape(scope, act, &[batch_size, s, s, 256])?;

        let (filter1, up1) = Self::upsample(&scope.with_name("deconv1"), config, reshaped, [batch_size, s, s, 128], 1)?;
        let up1 = Self::normalize(&scope.with_name("deconv1"), config, up1)?;

        let (filter2, up2) = Self::upsample(&scope.with_name("deconv2"), config, up1, [batch_size, 2 * s, 2 * s, 64], 2)?;
        let up2 = Self::normalize(&scope.with_name("deconv2"), config, up2)?;

        let image_shape = config.image_shape(batch_size);
        let (filter3, output) = Self::upsample(&scope.with_name("deconv3"), config, up2, image_shape, 2)?;

        tracing::info!(
            scope = scope.prefix(),
            batch_size,
            kernel = k,
            output = ?image_shape,
            "built generator"
        );

        Ok(Self { w1, filter1, filter2, filter3, noise, output })
    }

    /// Transposed convolution from `input` to `output_shape`, with a Glorot
    /// initialized `[k, k, out_channels, in_channels]` filter.
    fn upsample(
        scope: &Scope,
        config: &DcganConfig,
        input: Output,
        output_shape: [usize; 4],
        stride: usize,
    ) -> Result<(Parameter, Output)> {
        let in_channels = scope.shape(input)?[3];
        let k = config.kernel_size;
        let filter_shape = [k, k, output_shape[3], in_channels];

        let filter = Parameter::new(scope, "filter", nn::glorot_uniform(scope, &filter_shape)?)?;
        let input_sizes = ops::shape_const(scope, &output_shape)?;
        let output = nn::conv2d_transpose(
            scope,
            input_sizes,
            filter.variable,
            input,
            [1, stride, stride, 1],
            Padding::Same,
        )?;
        Ok((filter, output))
    }

    /// Fused batch norm over the batch statistics, then leaky ReLU.
    fn normalize(scope: &Scope, config: &DcganConfig, x: Output) -> Result<Output> {
        let channels = scope.shape(x)?[3];
        let offset = ops::broadcast_to(scope, ops::scalar(scope, 0.0)?, &[channels])?;
        let scale = ops::broadcast_to(scope, ops::scalar(scope, 1.0)?, &[channels])?;
        let empty = ops::vector(scope, &[])?;

        let bn = ops::fused_batch_norm(scope, x, scale, offset, empty, empty, config.batch_norm_epsilon, true)?;
        ops::leaky_relu(scope, bn.y, config.leaky_relu_alpha)
    }

    pub fn parameters(&self) -> [&Parameter; 4] {
        [&self.w1, &self.filter1, &self.filter2, &self.filter3]
    }

    pub fn initializers(&self) -> Vec<Output> {
        self.parameters().iter().flat_map(|p| p.initializers()).collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcgan_core::backends::session::Session;
    use dcgan_core::backends::Tensor;

    fn small_config() -> DcganConfig {
        DcganConfig { noise_dim: 8, image_size: 8, kernel_size: 3, ..Default::default() }
    }

    #[test]
    fn test_generator_output_shape() {
        let scope = Scope::new_root();
        let generator = Generator::new(&scope.with_name("generator"), &DcganConfig::default(), 4).unwrap();
        assert_eq!(scope.shape(generator.output).unwrap(), vec![4, 28, 28, 1]);
        assert_eq!(scope.shape(generator.noise).unwrap(), vec![4, 100]);
        assert_eq!(generator.w1.shape, vec![100, 12544]);
        assert_eq!(generator.filter1.shape, vec![5, 5, 128, 256]);
        assert_eq!(generator.filter2.shape, vec![5, 5, 64, 128]);
        assert_eq!(generator.filter3.shape, vec![5, 5, 1, 64]);
        assert_eq!(generator.initializers().len(), 12);

        let graph = scope.graph();
        assert_eq!(graph.node(generator.w1.variable.node).unwrap().name, "generator/dense/w1");
        assert_eq!(graph.node(generator.filter2.variable.node).unwrap().name, "generator/deconv2/filter");
        assert_eq!(graph.to_graph_def().count_ops("FusedBatchNorm"), 2);
        assert_eq!(graph.to_graph_def().count_ops("Conv2DBackpropInput"), 3);
    }

    #[test]
    fn test_generator_rejects_zero_batch() {
        let scope = Scope::new_root();
        assert!(Generator::new(&scope, &DcganConfig::default(), 0).is_err());
        assert!(scope.graph().is_empty());
    }

    #[test]
    fn test_generator_runs() {
        let config = small_config();
        let scope = Scope::new_root();
        let generator = Generator::new(&scope, &config, 2).unwrap();

        let mut session: Session = Session::with_seed(&scope, config.seed);
        session.initialize(&generator.initializers()).unwrap();
        let images = session.fetch(generator.output).unwrap().into_float().unwrap();
        assert_eq!(images.shape(), vec![2, 8, 8, 1]);
        assert!(images.get_data().iter().all(|v| v.is_finite()));
    }
}
