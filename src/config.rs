// Copyright 2022-2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Encoder configuration structs.

use std::num::NonZeroUsize;

use serde::Deserialize;
use serde::Serialize;

use super::component::FileType;
use super::constant::qlpc::DEFAULT_ORDER_SEARCH_WIDTH;
use super::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use super::constant::rice::MAX_RICE_PARAMETER;
use super::constant::stream::DEFAULT_V1_MEAN_BLOCKS;
use super::constant::stream::DEFAULT_V2_MEAN_BLOCKS;
use super::constant::stream::FORMAT_VERSION;
use super::constant::stream::MAX_MEAN_BLOCKS;
use super::constant::stream::MAX_SUPPORTED_VERSION;
use super::constant::stream::MIN_SUPPORTED_VERSION;
use super::constant::DEFAULT_BLOCK_SIZE;
use super::constant::MAX_BLOCK_SIZE;
use super::error::verify_range;
use super::error::verify_true;
use super::error::Verify;
use super::error::VerifyError;
use super::lpc::Window;

/// Configuration for encoder.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Encoder {
    /// Format version written to the stream header.
    pub version: u8,
    /// Number of samples per channel in a block.
    pub block_size: usize,
    /// Maximum order of QLPC. Zero disables QLPC.
    pub max_lpc_order: usize,
    /// Number of past blocks averaged for the mean offset.
    pub mean_blocks: usize,
    /// Sample format recorded in the stream header when the source doesn't
    /// provide one.
    pub file_type: FileType,
    /// If set, channels are encoded in worker threads.
    pub multithread: bool,
    /// Number of worker threads. If unset, `SHNENC_WORKERS` or the available
    /// parallelism is used.
    pub workers: Option<NonZeroUsize>,
    /// Configuration for fixed polynomial predictors.
    pub fixed: Fixed,
    /// Configuration for quantized LPC.
    pub qlpc: Qlpc,
    /// Configuration for Rice coding.
    pub rice: Rice,
}

impl Encoder {
    /// Returns the default configuration for the format `version`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::config::Encoder;
    /// assert_eq!(Encoder::for_version(1).mean_blocks, 0);
    /// assert_eq!(Encoder::for_version(2).mean_blocks, 4);
    /// ```
    pub fn for_version(version: u8) -> Self {
        Self {
            version,
            mean_blocks: if version >= 2 {
                DEFAULT_V2_MEAN_BLOCKS
            } else {
                DEFAULT_V1_MEAN_BLOCKS
            },
            qlpc: Qlpc {
                order_search_width: (version >= 2).then_some(DEFAULT_ORDER_SEARCH_WIDTH),
                ..Qlpc::default()
            },
            ..Self::default()
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            block_size: DEFAULT_BLOCK_SIZE,
            max_lpc_order: 0,
            mean_blocks: DEFAULT_V2_MEAN_BLOCKS,
            file_type: FileType::default(),
            multithread: cfg!(feature = "par"),
            workers: None,
            fixed: Fixed::default(),
            qlpc: Qlpc::default(),
            rice: Rice::default(),
        }
    }
}

impl Verify for Encoder {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!(
            "version",
            self.version,
            MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION
        )?;
        verify_range!("block_size", self.block_size, 1..=MAX_BLOCK_SIZE)?;
        verify_range!("max_lpc_order", self.max_lpc_order, ..=MAX_LPC_ORDER)?;
        verify_true!(
            "max_lpc_order",
            self.max_lpc_order == 0 || self.max_lpc_order < self.block_size,
            "must be less than `block_size`"
        )?;
        verify_range!("mean_blocks", self.mean_blocks, ..=MAX_MEAN_BLOCKS)?;
        self.fixed.verify().map_err(|e| e.within("fixed"))?;
        self.qlpc.verify().map_err(|e| e.within("qlpc"))?;
        self.rice.verify().map_err(|e| e.within("rice"))
    }
}

/// Configuration for the fixed polynomial predictors (DIFF0 to DIFF3).
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Fixed {
    /// Highest order of the polynomial predictors tried.
    pub max_order: usize,
}

impl Default for Fixed {
    fn default() -> Self {
        Self { max_order: 3 }
    }
}

impl Verify for Fixed {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("max_order", self.max_order, ..=3usize)
    }
}

/// Configuration for Rice coding.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Rice {
    /// Max value for the parameter of rice coding.
    pub max_parameter: usize,
}

impl Default for Rice {
    fn default() -> Self {
        Self {
            max_parameter: MAX_RICE_PARAMETER,
        }
    }
}

impl Verify for Rice {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("max_parameter", self.max_parameter, ..=MAX_RICE_PARAMETER)
    }
}

/// Configuration for quantized linear-predictive coding (QLPC).
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Qlpc {
    /// Number of orders searched beyond the best order found so far.
    ///
    /// If unset, all the orders up to `max_lpc_order` are evaluated. The
    /// default is unset for version 1 streams.
    pub order_search_width: Option<usize>,
    /// If set, use a direct MSE method for LPC estimation.
    pub use_direct_mse: bool,
    /// Window function to be used for LPC estimation.
    pub window: Window,
}

impl Default for Qlpc {
    fn default() -> Self {
        Self {
            order_search_width: Some(DEFAULT_ORDER_SEARCH_WIDTH),
            use_direct_mse: false,
            window: Window::default(),
        }
    }
}

impl Verify for Qlpc {
    fn verify(&self) -> Result<(), VerifyError> {
        if let Window::Tukey { alpha } = self.window {
            verify_true!(
                "window.alpha",
                (0.0..=1.0).contains(&alpha),
                "must be in the range of [0.0, 1.0]"
            )?;
        }
        if self.use_direct_mse && !cfg!(feature = "experimental") {
            return Err(VerifyError::new(
                "use_direct_mse",
                "requires the `experimental` feature",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization() {
        let config = Encoder::default();
        assert!(toml::to_string(&config).is_ok());
    }

    #[test]
    fn deserialization() {
        let src = "
max_lpc_order = 16

[qlpc]
order_search_width = 5
";
        let config: Encoder = toml::from_str(src).expect("Parse error.");
        assert_eq!(config.max_lpc_order, 16);
        assert_eq!(config.qlpc.order_search_width, Some(5));

        // Check the rest is default.
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.version, FORMAT_VERSION);
        assert_eq!(config.rice.max_parameter, MAX_RICE_PARAMETER);
        assert!(config.verify().is_ok());
    }

    #[test]
    fn if_empty_source_yields_default_config() {
        let empty_src = "";
        let config: Encoder = toml::from_str(empty_src).expect("Parse error.");
        let default_config: Encoder = Encoder::default();
        eprintln!(
            "## Current default config\n\n{}",
            toml::to_string(&config).unwrap()
        );
        assert_eq!(toml::to_string(&config), toml::to_string(&default_config));
    }

    #[test]
    fn invalid_settings_are_reported_with_path() {
        let mut config = Encoder::default();
        config.rice.max_parameter = 30;
        assert_eq!(config.verify().unwrap_err().path(), "rice.max_parameter");

        let mut config = Encoder::default();
        config.max_lpc_order = 300;
        assert!(config.verify().is_err());

        let mut config = Encoder::default();
        config.block_size = 8;
        config.max_lpc_order = 8;
        assert!(config.verify().is_err());

        let config = Encoder::for_version(4);
        assert_eq!(config.verify().unwrap_err().path(), "version");
    }
}
