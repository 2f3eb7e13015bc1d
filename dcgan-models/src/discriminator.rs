use crate::config::DcganConfig;
use crate::params::Parameter;

use dcgan_core::backends::Padding;
use dcgan_core::graph::{ops, Output, Scope};
use dcgan_core::{nn, Result};

/// Convolutional classifier producing one logit per image.
///
/// [`Discriminator::new`] declares the variables and applies the network to
/// its inputs; [`Discriminator::apply`] builds the same network on other
/// inputs against those variables.
#[derive(Debug, Clone)]
pub struct Discriminator {
    pub conv1_weights: Parameter,
    pub conv1_biases: Parameter,
    pub conv2_weights: Parameter,
    pub conv2_biases: Parameter,
    pub fc1_weights: Parameter,
    pub fc1_biases: Parameter,
    pub output: Output,
    config: DcganConfig,
}

impl Discriminator {
    pub fn new(scope: &Scope, config: &DcganConfig, inputs: Output, batch_size: usize) -> Result<Self> {
        config.validate()?;

        let k = config.kernel_size;
        let channels = config.num_channels;
        let flat = config.flat_features();

        let conv1_weights = Parameter::new(scope, "conv1_weights", nn::glorot_uniform(scope, &[k, k, channels, 64])?)?;
        let conv1_biases = Parameter::new(scope, "conv1_biases", ops::zeros(scope, &[64])?)?;
        let conv2_weights = Parameter::new(scope, "conv2_weights", nn::glorot_uniform(scope, &[k, k, 64, 128])?)?;
        let conv2_biases = Parameter::new(scope, "conv2_biases", ops::zeros(scope, &[128])?)?;
        let fc1_weights = Parameter::new(scope, "fc1_weights", nn::glorot_uniform(scope, &[flat, 1])?)?;
        let fc1_biases = Parameter::new(scope, "fc1_biases", ops::zeros(scope, &[1])?)?;

        let mut discriminator = Self {
            conv1_weights,
            conv1_biases,
            conv2_weights,
            conv2_biases,
            fc1_weights,
            fc1_biases,
            output: inputs,
            config: config.clone(),
        };
        discriminator.output = discriminator.apply(scope, inputs, batch_size)?;

        tracing::info!(scope = scope.prefix(), batch_size, parameters = discriminator.parameter_count(), "built discriminator");
        Ok(discriminator)
    }

    /// Logits `[batch_size, 1]` for `inputs`, reusing this discriminator's variables.
    pub fn apply(&self, scope: &Scope, inputs: Output, batch_size: usize) -> Result<Output> {
        let block1 = self.conv_block(&scope.with_name("conv1"), inputs, &self.conv1_weights, &self.conv1_biases)?;
        let block2 = self.conv_block(&scope.with_name("conv2"), block1, &self.conv2_weights, &self.conv2_biases)?;

        let fc_scope = scope.with_name("fc1");
        let flat = ops::reshape(&fc_scope, block2, &[batch_size, self.config.flat_features()])?;
        let logits = ops::matmul(&fc_scope, flat, self.fc1_weights.variable)?;
        ops::bias_add(&fc_scope.with_op_name("logits"), logits, self.fc1_biases.variable)
    }

    /// Strided convolution, bias, leaky ReLU, dropout.
    fn conv_block(&self, scope: &Scope, x: Output, weights: &Parameter, biases: &Parameter) -> Result<Output> {
        let conv = ops::conv2d(scope, x, weights.variable, [1, 2, 2, 1], Padding::Same)?;
        let biased = ops::bias_add(scope, conv, biases.variable)?;
        let act = ops::leaky_relu(scope, biased, self.config.leaky_relu_alpha)?;
        nn::dropout(scope, act, self.config.dropout_rate)
    }

    pub fn parameters(&self) -> [&Parameter; 6] {
        [
            &self.conv1_weights,
            &self.conv1_biases,
            &self.conv2_weights,
            &self.conv2_biases,
            &self.fc1_weights,
            &self.fc1_biases,
        ]
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
    use dcgan_core::backends::cpu::CpuTensor;
    use dcgan_core::backends::session::{Session, Value};
    use dcgan_core::backends::Tensor;
    use dcgan_core::Error;

    #[test]
    fn test_discriminator_logits_shape() {
        let config = DcganConfig::default();
        let scope = Scope::new_root();
        let images = ops::placeholder(&scope, &config.image_shape(3)).unwrap();
        let disc = Discriminator::new(&scope.with_name("discriminator"), &config, images, 3).unwrap();

        assert_eq!(scope.shape(disc.output).unwrap(), vec![3, 1]);
        assert_eq!(disc.fc1_weights.shape, vec![6272, 1]);
        assert_eq!(disc.initializers().len(), 18);
        let graph = scope.graph();
        assert_eq!(graph.node(disc.output.node).unwrap().name, "discriminator/fc1/logits");
    }

    #[test]
    fn test_apply_reuses_variables() {
        let config = DcganConfig::default();
        let scope = Scope::new_root();
        let disc_scope = scope.with_name("discriminator");
        let real = ops::placeholder(&scope, &config.image_shape(2)).unwrap();
        let disc = Discriminator::new(&disc_scope, &config, real, 2).unwrap();

        let variables = scope.graph().variables().count();
        let fake = ops::placeholder(&scope, &config.image_shape(2)).unwrap();
        let fake_logits = disc.apply(&disc_scope, fake, 2).unwrap();

        assert_eq!(scope.graph().variables().count(), variables);
        assert_eq!(scope.shape(fake_logits).unwrap(), vec![2, 1]);
        assert_ne!(fake_logits, disc.output);
    }

    #[test]
    fn test_wrong_image_shape_is_rejected() {
        let config = DcganConfig::default();
        let scope = Scope::new_root();
        let images = ops::placeholder(&scope, &[2, 28, 28, 3]).unwrap();
        let err = Discriminator::new(&scope, &config, images, 2).unwrap_err();
        assert!(matches!(err, Error::IncompatibleShapes { op: "Conv2D", .. }));
    }

    #[test]
    fn test_discriminator_runs() {
        let config = DcganConfig { image_size: 8, kernel_size: 3, dropout_rate: 0.0, ..Default::default() };
        let scope = Scope::new_root();
        let images = ops::placeholder(&scope, &config.image_shape(2)).unwrap();
        let disc = Discriminator::new(&scope, &config, images, 2).unwrap();

        let mut session: Session = Session::with_seed(&scope, 5);
        session.initialize(&disc.initializers()).unwrap();

        let fed = Value::Float(CpuTensor::full(&config.image_shape(2), 0.5));
        let logits = session.run(&[(images, fed)], &[disc.output], &[]).unwrap().remove(0).into_float().unwrap();
        assert_eq!(logits.shape(), vec![2, 1]);
        // identical images, no dropout
        let data = logits.get_data();
        assert!((data[[0, 0]] - data[[1, 0]]).abs() < 1e-5);
    }
}
