//! Errors raised while completing or validating options.

use thiserror::Error;

/// Errors reported by the option lifecycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// A single field failed validation.
    #[error("invalid {option} option `{field}`: {reason}")]
    Invalid {
        /// Namespace of the option group, for example `mysql`.
        option: &'static str,
        /// Flag-style field name, for example `max-idle-connections`.
        field: &'static str,
        /// Human readable explanation.
        reason: String,
    },
    /// Several fields failed validation.
    #[error("{} invalid options: {}", .0.len(), render_all(.0))]
    Multiple(Vec<OptionError>),
}

impl OptionError {
    /// Creates an [`OptionError::Invalid`] error.
    #[must_use]
    pub fn invalid(option: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            option,
            field,
            reason: reason.into(),
        }
    }

    /// Folds collected errors into a single result.
    ///
    /// Nested [`OptionError::Multiple`] values are flattened.
    ///
    /// # Errors
    ///
    /// Returns the only error when one was collected, or
    /// [`OptionError::Multiple`] when several were.
    pub fn collect(errors: Vec<Self>) -> Result<(), Self> {
        let mut flat: Vec<Self> = errors.into_iter().flat_map(Self::into_flat).collect();
        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Self::Multiple(flat)),
        }
    }

    /// Lists every individual failure carried by this error.
    #[must_use]
    pub fn failures(&self) -> Vec<&Self> {
        match self {
            Self::Invalid { .. } => vec![self],
            Self::Multiple(errors) => errors.iter().flat_map(Self::failures).collect(),
        }
    }

    fn into_flat(self) -> Vec<Self> {
        match self {
            Self::Multiple(errors) => errors.into_iter().flat_map(Self::into_flat).collect(),
            invalid @ Self::Invalid { .. } => vec![invalid],
        }
    }
}

fn render_all(errors: &[OptionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
