//! DCGAN generator and discriminator graphs built on `dcgan-core`.

pub mod config;
pub mod discriminator;
pub mod gan;
pub mod generator;
pub mod losses;
pub mod params;

pub use config::DcganConfig;
pub use discriminator::Discriminator;
pub use gan::Dcgan;
pub use generator::Generator;
pub use losses::{discriminator_loss, generator_loss};
pub use params::Parameter;
