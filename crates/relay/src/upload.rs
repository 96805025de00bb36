//! Uploader trait and item captions.

use std::path::Path;

use linkrelay_transfer::ByteCounter;

use crate::error::UploadError;
use crate::fetch::BoxFuture;

/// Caption attached to a file relayed as-is.
pub const DEFAULT_CAPTION: &str = "❤️ Created by @NT_BOT_CHANNEL";

/// Sends finished items to the messaging destination.
pub trait Uploader: Send + Sync {
    /// Uploads the file at `path` with `caption`.
    ///
    /// Implementations advance `sent` as bytes leave the process so the
    /// progress monitor can observe them.
    fn upload<'a>(
        &'a self,
        path: &'a Path,
        caption: &'a str,
        sent: ByteCounter,
    ) -> BoxFuture<'a, Result<(), UploadError>>;
}

/// Caption for a file extracted from an archive.
pub fn member_caption(name: &str) -> String {
    format!("Extracted file: {name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_caption_names_file() {
        assert_eq!(member_caption("a.txt"), "Extracted file: a.txt");
    }
}
