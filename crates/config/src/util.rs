// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::Figment;
use serde::de::{DeserializeOwned, Error as _};

/// A boxed error returned while loading or validating a section
pub type ConfigurationError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trait implemented by all configuration sections, to load them from a
/// [`Figment`] and check them before anything starts.
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Where this section lives relative to the root, if anywhere
    const PATH: Option<&'static str> = None;

    /// Validate the configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(&self, _figment: &Figment) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Extract the section from a Figment instance, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration could not be loaded or is invalid
    fn extract(figment: &Figment) -> Result<Self, ConfigurationError> {
        let this: Self = if let Some(path) = Self::PATH {
            figment.extract_inner(path)?
        } else {
            figment.extract()?
        };

        this.validate(figment)?;
        Ok(this)
    }
}

/// Extension trait for [`ConfigurationSection`], to fall back to the default
/// value when the section is absent
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Extract the section from the given [`Figment`], or return the default
    /// value if the section is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration section is invalid.
    fn extract_or_default(figment: &Figment) -> Result<Self, ConfigurationError> {
        let this: Self = match Self::PATH {
            Some(path) if !figment.contains(path) => return Ok(Self::default()),
            Some(path) => figment.extract_inner(path)?,
            None => figment.extract()?,
        };

        this.validate(figment)?;
        Ok(this)
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}

/// Build an error pointing at a field of a section, carrying the metadata of
/// where the section was loaded from
pub(crate) fn field_error(
    figment: &Figment,
    section: &'static str,
    field: impl Into<String>,
    message: impl std::fmt::Display,
) -> figment::Error {
    let mut error = figment::Error::custom(message);
    error.metadata = figment.find_metadata(section).cloned();
    error.profile = Some(figment::Profile::Default);
    error.path = vec![section.to_owned(), field.into()];
    error
}
