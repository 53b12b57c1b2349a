//! Media type lookup for attachments.

use std::path::Path;

/// Maps attachment file names to media types.
pub trait MediaTypes: Send + Sync {
    /// Media type for `path`, or `None` when the extension is unknown.
    fn lookup(&self, path: &Path) -> Option<String>;
}

/// Extension-based lookup backed by `mime_guess`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuessMediaTypes;

impl MediaTypes for GuessMediaTypes {
    fn lookup(&self, path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?;
        mime_guess::from_ext(extension)
            .first_raw()
            .map(str::to_string)
    }
}
