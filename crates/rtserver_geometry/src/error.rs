//! # Geometry Load Errors

use thiserror::Error;

/// Errors that can occur while preparing geometry.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The geometry source could not be read.
    #[error("failed to open geometry source {path}: {source}")]
    Io {
        /// Path that was opened.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The geometry source is not a valid scene.
    #[error("failed to parse geometry source: {0}")]
    Parse(#[from] toml::de::Error),

    /// Neither explicit object names nor default top-level objects were given.
    #[error("no top-level objects to load")]
    NoTopObjects,

    /// A requested object does not exist in the source.
    #[error("object not found in geometry source: {0}")]
    UnknownObject(String),

    /// Articulated geometry was requested together with an explicit object list.
    #[error("articulated geometry cannot be combined with an explicit object list")]
    ArticulationWithObjects,

    /// A primitive has degenerate parameters.
    #[error("invalid primitive in region {region}: {reason}")]
    InvalidPrimitive {
        /// Region that owns the primitive.
        region: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for geometry loading.
pub type LoadResult<T> = Result<T, LoadError>;
