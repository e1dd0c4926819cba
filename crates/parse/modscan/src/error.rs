use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while scanning or resolving module references.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A source file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// The file that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `mod` declaration matched neither candidate file.
    #[error(
        "cannot resolve mod {module} in scope of {}, tried {} and {}",
        from.display(),
        tried[0].display(),
        tried[1].display()
    )]
    UnresolvedModule {
        /// The declared module name.
        module: String,
        /// The file containing the declaration.
        from: PathBuf,
        /// Sibling and nested candidates, in lookup order.
        tried: [PathBuf; 2],
    },

    /// A `#[path]` override names a file that does not exist.
    #[error("cannot find {} included from {}", path.display(), from.display())]
    MissingInclude {
        /// The overridden path.
        path: PathBuf,
        /// The file containing the override.
        from: PathBuf,
    },
}
