//! Downloading archives over HTTP(S).
//!
//! ```no_run
//! # use std::path::Path;
//! use zipgrab::fetch::{github_archive_url, Fetcher};
//!
//! let url = github_archive_url("joaobcandido", "posto-de-gasolina", "main");
//! Fetcher::new()?.download(&url, Path::new("repo.zip"))?;
//! zipgrab::extract("repo.zip", "unzipped")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::*;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Couldn't set up an HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with {status}")]
    Status { url: String, status: StatusCode },

    #[error("Couldn't write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where GitHub serves a zip of a branch's tree.
///
/// The archive holds a single `<repo>-<branch>` directory.
pub fn github_archive_url(owner: &str, repo: &str, branch: &str) -> String {
    format!("https://github.com/{owner}/{repo}/archive/refs/heads/{branch}.zip")
}

/// A blocking HTTP client for pulling down archives
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// A client with reqwest's default (30 second) timeout
    pub fn new() -> Result<Self, FetchError> {
        Self::build(Client::builder())
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        Self::build(Client::builder().timeout(timeout))
    }

    fn build(builder: reqwest::blocking::ClientBuilder) -> Result<Self, FetchError> {
        let client = builder
            .user_agent(concat!("zipgrab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// Downloads `url` into a new file at `path`, returning the bytes written.
    ///
    /// Redirects are followed. Anything but a success status is an error,
    /// and nothing is written in that case.
    pub fn download(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        info!("Downloading {}", parsed);
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_owned(),
            source: e,
        };
        let mut response = self.client.get(parsed).send().map_err(request_error)?;

        let status = response.status();
        debug!("{} responded with {}", url, status);
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status,
            });
        }

        let mut sink = File::create(path).map_err(|e| FetchError::Write {
            path: path.to_owned(),
            source: e,
        })?;
        let written = response.copy_to(&mut sink).map_err(request_error)?;
        info!("Saved {} bytes to {}", written, path.display());
        Ok(written)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn github_urls() {
        assert_eq!(
            github_archive_url("joaobcandido", "posto-de-gasolina", "main"),
            "https://github.com/joaobcandido/posto-de-gasolina/archive/refs/heads/main.zip"
        );
    }

    #[test]
    fn bad_urls_fail_before_any_request() {
        let tempdir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let target = tempdir.path().join("repo.zip");
        match fetcher.download("not a url", &target) {
            Err(FetchError::InvalidUrl { url, .. }) => assert_eq!(url, "not a url"),
            other => panic!("Expected an invalid URL error, got {:?}", other),
        }
        assert!(!target.exists());
    }
}
