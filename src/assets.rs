//! Local cache of the PDFs referenced by the lobbying dataset.
//!
//! ```text
//! asset_dir/
//! ├── Jane%20Doe%202021-2022.pdf
//! └── acme%20corp.pdf
//! ```
//!
//! Files already present are never fetched again. A failed download is
//! logged and counted; the rest still run.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ScrapeError;
use crate::http::{Fetch, Request};
use crate::scrapers::lobbying::Filing;
use crate::utils::ensure_writable_dir;

/// Counts reported by one cache refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Download every filing's PDF into `dir` that is not there yet.
///
/// Only an unusable `dir` is an error; individual downloads that fail are
/// counted in [`AssetSummary::failed`].
#[instrument(level = "info", skip_all, fields(dir = %dir.display(), filings = filings.len()))]
pub async fn download_all<F: Fetch>(
    fetch: &F,
    filings: &[Filing],
    dir: &Path,
) -> Result<AssetSummary, ScrapeError> {
    ensure_writable_dir(dir).await?;
    let mut summary = AssetSummary::default();

    for filing in filings {
        let Some(name) = filing.file_name() else {
            warn!(url = %filing.url, "Filing URL has no file name; skipping");
            summary.failed += 1;
            continue;
        };
        let target = dir.join(&name);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(file = %name, "Already cached");
            summary.skipped += 1;
            continue;
        }

        let result = match fetch.bytes(&Request::get(&filing.url)).await {
            Ok(body) => write_atomically(dir, &target, &body),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(file = %name, "Downloaded");
                summary.downloaded += 1;
            }
            Err(e) => {
                error!(url = %filing.url, error = %e, "Download failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        failed = summary.failed,
        "Asset cache refreshed"
    );
    Ok(summary)
}

fn write_atomically(dir: &Path, target: &Path, body: &[u8]) -> Result<(), ScrapeError> {
    let io_err = |e| ScrapeError::io(target, e);
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(body).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(target).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::http::tests::FakeFetch;

    fn filing(url: &str) -> Filing {
        Filing {
            name: "JANE DOE".to_string(),
            period: "2021-2022".to_string(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_downloads_skips_and_counts_failures() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cached.pdf"), b"old").unwrap();

        let fetch = FakeFetch::new().page(Request::get("http://e.test/r/new.pdf"), "%PDF-1.4 new");
        let filings = [
            filing("http://e.test/r/new.pdf"),
            filing("http://e.test/r/cached.pdf"),
            filing("http://e.test/r/gone.pdf"),
        ];

        let summary = download_all(&fetch, &filings, dir.path()).await.unwrap();
        assert_eq!(
            summary,
            AssetSummary {
                downloaded: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(fs::read(dir.path().join("new.pdf")).unwrap(), b"%PDF-1.4 new");
        assert_eq!(fs::read(dir.path().join("cached.pdf")).unwrap(), b"old");
        assert!(!dir.path().join("gone.pdf").exists());
    }

    #[tokio::test]
    async fn test_second_refresh_fetches_nothing() {
        let dir = tempdir().unwrap();
        let fetch = FakeFetch::new().page(Request::get("http://e.test/r/a.pdf"), "pdf");
        let filings = [filing("http://e.test/r/a.pdf")];

        download_all(&fetch, &filings, dir.path()).await.unwrap();
        let summary = download_all(&fetch, &filings, dir.path()).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 0);
    }
}
