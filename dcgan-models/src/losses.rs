use dcgan_core::graph::{ops, Output, Scope};
use dcgan_core::{nn, Result};

/// Mean cross entropy of the discriminator's verdict on generated images
/// against "real" labels.
pub fn generator_loss(scope: &Scope, fake_output: Output) -> Result<Output> {
    let labels = ops::ones_like(scope, fake_output)?;
    ops::mean(scope, nn::sigmoid_cross_entropy_with_logits(scope, labels, fake_output)?)
}

/// Mean cross entropy of real images against ones plus generated images
/// against zeros.
pub fn discriminator_loss(scope: &Scope, real_output: Output, fake_output: Output) -> Result<Output> {
    let real_labels = ops::ones_like(scope, real_output)?;
    let real_loss = ops::mean(scope, nn::sigmoid_cross_entropy_with_logits(scope, real_labels, real_output)?)?;

    let fake_labels = ops::zeros_like(scope, fake_output)?;
    let fake_loss = ops::mean(scope, nn::sigmoid_cross_entropy_with_logits(scope, fake_labels, fake_output)?)?;

    ops::add(scope, real_loss, fake_loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcgan_core::backends::session::Session;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_losses_at_zero_logits() {
        let scope = Scope::new_root();
        let real = ops::zeros(&scope, &[4, 1]).unwrap();
        let fake = ops::zeros(&scope, &[4, 1]).unwrap();
        let gen_loss = generator_loss(&scope, fake).unwrap();
        let disc_loss = discriminator_loss(&scope, real, fake).unwrap();
        assert!(scope.shape(gen_loss).unwrap().is_empty());

        let mut session: Session = Session::with_seed(&scope, 0);
        let out = session.run(&[], &[gen_loss, disc_loss], &[]).unwrap();
        assert_abs_diff_eq!(out[0].scalar().unwrap(), std::f32::consts::LN_2, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1].scalar().unwrap(), 2.0 * std::f32::consts::LN_2, epsilon = 1e-6);
    }

    #[test]
    fn test_confident_discriminator() {
        let scope = Scope::new_root();
        let real = ops::fill(&scope, 20.0, &[2, 1]).unwrap();
        let fake = ops::fill(&scope, -20.0, &[2, 1]).unwrap();
        let gen_loss = generator_loss(&scope, fake).unwrap();
        let disc_loss = discriminator_loss(&scope, real, fake).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        let out = session.run(&[], &[gen_loss, disc_loss], &[]).unwrap();
        assert_abs_diff_eq!(out[0].scalar().unwrap(), 20.0, epsilon = 1e-4);
        assert!(out[1].scalar().unwrap() < 1e-6);
    }
}
