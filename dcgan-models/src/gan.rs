use crate::config::DcganConfig;
use crate::discriminator::Discriminator;
use crate::generator::Generator;
use crate::losses::{discriminator_loss, generator_loss};

use dcgan_core::graph::{ops, Output, Scope};
use dcgan_core::Result;

/// Both networks and their losses in one graph: the discriminator is applied
/// to a placeholder of real images and, with shared variables, to the
/// generator's output.
#[derive(Debug, Clone)]
pub struct Dcgan {
    pub generator: Generator,
    pub discriminator: Discriminator,
    pub real_images: Output,
    pub real_output: Output,
    pub fake_output: Output,
    pub generator_loss: Output,
    pub discriminator_loss: Output,
}

impl Dcgan {
    pub fn new(scope: &Scope, config: &DcganConfig, batch_size: usize) -> Result<Self> {
        let generator = Generator::new(&scope.with_name("generator"), config, batch_size)?;

        let real_images = ops::placeholder(&scope.with_op_name("real_images"), &config.image_shape(batch_size))?;
        let disc_scope = scope.with_name("discriminator");
        let discriminator = Discriminator::new(&disc_scope, config, real_images, batch_size)?;
        let fake_output = discriminator.apply(&disc_scope, generator.output, batch_size)?;

        let loss_scope = scope.with_name("loss");
        let generator_loss = generator_loss(&loss_scope.with_name("generator"), fake_output)?;
        let discriminator_loss = discriminator_loss(&loss_scope.with_name("discriminator"), discriminator.output, fake_output)?;

        tracing::info!(
            nodes = scope.graph().len(),
            generator_parameters = generator.parameter_count(),
            discriminator_parameters = discriminator.parameter_count(),
            "built dcgan graph"
        );

        Ok(Self {
            real_output: discriminator.output,
            generator,
            discriminator,
            real_images,
            fake_output,
            generator_loss,
            discriminator_loss,
        })
    }

    pub fn initializers(&self) -> Vec<Output> {
        let mut assigns = self.generator.initializers();
        assigns.extend(self.discriminator.initializers());
        assigns
    }
}
