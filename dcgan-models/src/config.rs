//! Hyperparameters shared by the generator and discriminator.

use dcgan_core::{Error, Result};

use serde::{Deserialize, Serialize};

use std::path::Path;

/// Network sizes and constants. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcganConfig {
    /// Length of the generator's noise vector.
    pub noise_dim: usize,
    /// Side of the square images; must be divisible by 4.
    pub image_size: usize,
    pub num_channels: usize,
    pub leaky_relu_alpha: f32,
    /// Discriminator dropout probability, in `[0, 1)`.
    pub dropout_rate: f32,
    pub batch_norm_epsilon: f32,
    /// Scale applied to standard normal samples for the generator's dense weights.
    pub dense_init_stddev: f32,
    pub kernel_size: usize,
    pub seed: u64,
}

impl Default for DcganConfig {
    fn default() -> Self {
        Self {
            noise_dim: 100,
            image_size: 28,
            num_channels: 1,
            leaky_relu_alpha: 0.3,
            dropout_rate: 0.3,
            batch_norm_epsilon: 0.001,
            dense_init_stddev: 0.01,
            kernel_size: 5,
            seed: 42,
        }
    }
}

impl DcganConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidArgument { op: "DcganConfig", message });

        if self.noise_dim == 0 || self.num_channels == 0 || self.kernel_size == 0 {
            return invalid(format!(
                "noise_dim, num_channels and kernel_size must be positive, got {}, {}, {}",
                self.noise_dim, self.num_channels, self.kernel_size
            ));
        }
        if self.image_size == 0 || self.image_size % 4 != 0 {
            return invalid(format!("image_size must be a positive multiple of 4, got {}", self.image_size));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return invalid(format!("dropout_rate must be in [0, 1), got {}", self.dropout_rate));
        }
        if self.batch_norm_epsilon < 0.0 {
            return invalid(format!("batch_norm_epsilon must be non-negative, got {}", self.batch_norm_epsilon));
        }
        Ok(())
    }

    /// Spatial side of the generator's first feature map.
    pub fn base_size(&self) -> usize {
        self.image_size / 4
    }

    /// Width of the generator's dense layer, reshaped to `[s, s, 256]`.
    pub fn units(&self) -> usize {
        self.base_size().pow(2) * 256
    }

    /// Features entering the discriminator's classifier, from `[s, s, 128]`.
    pub fn flat_features(&self) -> usize {
        self.base_size().pow(2) * 128
    }

    pub fn image_shape(&self, batch_size: usize) -> [usize; 4] {
        [batch_size, self.image_size, self.image_size, self.num_channels]
    }
}
