//! Request target composition
//!
//! The upload core receives an already-resolved folder locator and derives
//! every request target from it by string composition. Resolving a folder
//! from a site (`GetFolderByServerRelativeUrl`) is provided as a convenience
//! for the CLI and tests.
//!
//! # Example
//!
//! ```
//! use sp_uploadr::locator::FolderLocator;
//!
//! let folder = FolderLocator::from_server_relative(
//!     "https://contoso.sharepoint.com/sites/docs",
//!     "/sites/docs/Shared Documents",
//! );
//! assert_eq!(
//!     folder.add_file_url("report.pdf", true),
//!     "https://contoso.sharepoint.com/sites/docs/_api/Web/GetFolderByServerRelativeUrl('/sites/docs/Shared%20Documents')/Files/add(overwrite=true,url='report.pdf')"
//! );
//! ```

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

/// Characters that cannot appear raw inside a quoted OData literal in a URL path
const ODATA_LITERAL: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Encode a value as the body of an OData string literal (`'...'`).
///
/// Single quotes are doubled, then URL-unsafe characters are percent-encoded.
pub fn odata_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    utf8_percent_encode(&escaped, ODATA_LITERAL).to_string()
}

fn trim_site(site_url: &str) -> &str {
    site_url.trim_end_matches('/')
}

/// Fully resolved URL of a remote folder resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderLocator(String);

impl FolderLocator {
    /// Wrap an already-resolved folder URL
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self(url.trim_end_matches('/').to_string())
    }

    /// Resolve a folder by its server-relative path under a site
    pub fn from_server_relative(site_url: &str, folder_path: &str) -> Self {
        Self(format!(
            "{}/_api/Web/GetFolderByServerRelativeUrl('{}')",
            trim_site(site_url),
            odata_literal(folder_path)
        ))
    }

    /// The folder URL
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Target of the single-request "add file" call
    pub fn add_file_url(&self, file_name: &str, overwrite: bool) -> String {
        format!(
            "{}/Files/add(overwrite={},url='{}')",
            self.0,
            overwrite,
            odata_literal(file_name)
        )
    }

    /// URL of a file inside this folder
    pub fn file_url(&self, file_name: &str) -> String {
        format!("{}/Files('{}')", self.0, odata_literal(file_name))
    }

    pub fn start_upload_url(&self, file_name: &str, upload_id: &str) -> String {
        format!(
            "{}/StartUpload(uploadId=guid'{}')",
            self.file_url(file_name),
            upload_id
        )
    }

    pub fn continue_upload_url(&self, file_name: &str, upload_id: &str, offset: u64) -> String {
        format!(
            "{}/ContinueUpload(uploadId=guid'{}',fileOffset={})",
            self.file_url(file_name),
            upload_id,
            offset
        )
    }

    pub fn finish_upload_url(&self, file_name: &str, upload_id: &str, offset: u64) -> String {
        format!(
            "{}/FinishUpload(uploadId=guid'{}',fileOffset={})",
            self.file_url(file_name),
            upload_id,
            offset
        )
    }

    pub fn cancel_upload_url(&self, file_name: &str, upload_id: &str) -> String {
        format!(
            "{}/CancelUpload(uploadId=guid'{}')",
            self.file_url(file_name),
            upload_id
        )
    }
}

impl fmt::Display for FolderLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Download target for a file addressed by its server-relative URL
pub fn file_content_url(site_url: &str, server_relative_url: &str) -> String {
    format!(
        "{}/_api/Web/GetFileByServerRelativeUrl('{}')/$value",
        trim_site(site_url),
        odata_literal(server_relative_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> FolderLocator {
        FolderLocator::new("https://site/_api/Web/GetFolderByServerRelativeUrl('/docs')/")
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(
            folder().as_str(),
            "https://site/_api/Web/GetFolderByServerRelativeUrl('/docs')"
        );
    }

    #[test]
    fn test_odata_literal_escapes_quotes_and_spaces() {
        assert_eq!(odata_literal("O'Brien notes.txt"), "O''Brien%20notes.txt");
        assert_eq!(odata_literal("a#b?c%d"), "a%23b%3Fc%25d");
        assert_eq!(odata_literal("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_session_urls() {
        let id = "0b7e2f3c-1111-4222-8333-944455556666";
        assert!(folder()
            .start_upload_url("big.bin", id)
            .ends_with("/Files('big.bin')/StartUpload(uploadId=guid'0b7e2f3c-1111-4222-8333-944455556666')"));
        assert!(folder()
            .continue_upload_url("big.bin", id, 20)
            .ends_with(&format!("/ContinueUpload(uploadId=guid'{}',fileOffset=20)", id)));
        assert!(folder()
            .finish_upload_url("big.bin", id, 30)
            .ends_with(&format!("/FinishUpload(uploadId=guid'{}',fileOffset=30)", id)));
        assert!(folder()
            .cancel_upload_url("big.bin", id)
            .ends_with(&format!("/CancelUpload(uploadId=guid'{}')", id)));
    }

    #[test]
    fn test_file_content_url() {
        assert_eq!(
            file_content_url("https://site/", "/docs/a b.txt"),
            "https://site/_api/Web/GetFileByServerRelativeUrl('/docs/a%20b.txt')/$value"
        );
    }
}
