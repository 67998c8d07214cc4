//! Start requests and the coding parameters they carry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::mode::PipelineKind;
use crate::{AppError, Result};

/// Output extensions the decoder may produce; anything else becomes `bin`.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mp3", "jpg", "png", "txt"];

/// Largest redundancy parameter accepted by the codec.
pub const MAX_REDUNDANCY: u32 = 63;

/// Codec parameters shared by the encode and decode sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CodingParams {
    /// Parity symbols per codeword.
    pub redundancy: u32,
    /// Interleaver depth.
    pub interleave_depth: u32,
    /// Bytes per slice.
    pub slice_bytes: u32,
    /// Wrapper framing ratio.
    pub theta: f64,
    /// Padding mode passed to the unwrapper.
    pub pad_mode: u8,
}

impl Default for CodingParams {
    fn default() -> Self {
        Self {
            redundancy: 16,
            interleave_depth: 32,
            slice_bytes: 1024,
            theta: 8.0,
            pad_mode: 0,
        }
    }
}

impl CodingParams {
    /// Clamp values into the ranges the codec accepts.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.redundancy = self.redundancy.clamp(1, MAX_REDUNDANCY);
        self.interleave_depth = self.interleave_depth.max(1);
        self.slice_bytes = self.slice_bytes.max(1);
        if !(self.theta.is_finite() && self.theta > 0.0) {
            self.theta = Self::default().theta;
        }
        self
    }

    /// Placeholder values for tool and process argument templates.
    #[must_use]
    pub fn placeholders(&self) -> Vec<(&'static str, String)> {
        vec![
            ("redundancy", self.redundancy.to_string()),
            ("interleave", self.interleave_depth.to_string()),
            ("slice", self.slice_bytes.to_string()),
            ("theta", self.theta.to_string()),
            ("pad", self.pad_mode.to_string()),
        ]
    }
}

/// A request to start one pipeline session.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    /// Pipeline to run.
    pub pipeline: PipelineKind,
    /// Output directory for receive pipelines, input file for transmit ones.
    pub location: PathBuf,
    /// Codec parameters.
    pub params: CodingParams,
    /// Requested extension of the decoded output.
    pub output_extension: String,
}

impl StartRequest {
    /// Receive into `output_dir`.
    #[must_use]
    pub fn receive(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: PipelineKind::Receive,
            location: output_dir.into(),
            params: CodingParams::default(),
            output_extension: "bin".into(),
        }
    }

    /// Hopping receive into `output_dir`.
    #[must_use]
    pub fn hopping(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: PipelineKind::HoppingReceive,
            ..Self::receive(output_dir)
        }
    }

    /// Transmit `input`.
    #[must_use]
    pub fn transmit(input: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: PipelineKind::Transmit,
            ..Self::receive(input)
        }
    }

    /// Hopping transmit of `input`.
    #[must_use]
    pub fn hopping_transmit(input: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: PipelineKind::HoppingTransmit,
            ..Self::receive(input)
        }
    }

    /// Override the codec parameters.
    #[must_use]
    pub fn with_params(mut self, params: CodingParams) -> Self {
        self.params = params;
        self
    }

    /// Override the decoded output extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.output_extension = extension.into();
        self
    }

    /// Decoded output extension after applying the allow-list.
    #[must_use]
    pub fn sanitized_extension(&self) -> &str {
        let requested = self.output_extension.trim_start_matches('.');
        ALLOWED_EXTENSIONS
            .iter()
            .find(|allowed| allowed.eq_ignore_ascii_case(requested))
            .copied()
            .unwrap_or("bin")
    }

    /// Directory every session artifact and log lives in.
    #[must_use]
    pub fn session_dir(&self) -> &Path {
        if self.pipeline.reads_input_file() {
            self.location
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
        } else {
            &self.location
        }
    }

    /// Check that the input or output location exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for a missing output directory or input
    /// file.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.reads_input_file() {
            if !self.location.is_file() {
                return Err(AppError::Config(format!(
                    "input file not found: {}",
                    self.location.display()
                )));
            }
        } else if !self.location.is_dir() {
            return Err(AppError::Config(format!(
                "output directory not found: {}",
                self.location.display()
            )));
        }
        Ok(())
    }
}
