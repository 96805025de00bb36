//! Fetcher trait and the download step of a job.
//!
//! A fetch is split in two so the progress monitor can start watching the
//! destination file before bytes arrive: [`plan_fetch`] resolves the remote
//! object's metadata, [`FetchPlan::execute`] streams it to disk.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::FetchError;
use crate::link::SourceLink;

/// Boxed future used at the trait seams of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metadata of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Original file name as reported by the storage service.
    pub name: String,
    /// Size in bytes, when the service reports one.
    pub size: Option<u64>,
}

/// Downloads objects behind [`SourceLink`]s.
///
/// The CLI implements this over HTTP; tests use in-memory mocks.
pub trait Fetcher: Send + Sync {
    /// Resolves the object's name and size.
    fn stat<'a>(&'a self, link: &'a SourceLink) -> BoxFuture<'a, Result<RemoteObject, FetchError>>;

    /// Streams the object into `dest`, creating the file.
    fn download<'a>(
        &'a self,
        link: &'a SourceLink,
        object: &'a RemoteObject,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), FetchError>>;
}

/// A resolved download, ready to run.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub link: SourceLink,
    pub object: RemoteObject,
    /// Where the object will be written.
    pub dest: PathBuf,
}

/// A downloaded object on local disk.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub elapsed: Duration,
}

/// Resolves `link` and picks a destination inside `dest_dir`.
pub async fn plan_fetch(
    fetcher: &dyn Fetcher,
    link: &SourceLink,
    dest_dir: &Path,
) -> Result<FetchPlan, FetchError> {
    link.require_file()?;
    let object = fetcher.stat(link).await?;
    let dest = dest_dir.join(local_file_name(&object.name, &link.id));
    debug!(
        link = %link.redacted(),
        name = %object.name,
        size = ?object.size,
        "remote object resolved"
    );
    Ok(FetchPlan {
        link: link.clone(),
        object,
        dest,
    })
}

impl FetchPlan {
    /// Size the monitor should expect (0 when unknown).
    pub fn expected_size(&self) -> u64 {
        self.object.size.unwrap_or(0)
    }

    /// Downloads the object and checks the result against its metadata.
    pub async fn execute(&self, fetcher: &dyn Fetcher) -> Result<FetchedObject, FetchError> {
        let started = Instant::now();
        fetcher.download(&self.link, &self.object, &self.dest).await?;

        let size = match tokio::fs::metadata(&self.dest).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::DownloadFailure(format!(
                    "{} was not written",
                    self.object.name
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(expected) = self.object.size
            && expected != size
        {
            return Err(FetchError::DownloadFailure(format!(
                "{}: expected {expected} bytes, received {size}",
                self.object.name
            )));
        }

        Ok(FetchedObject {
            path: self.dest.clone(),
            name: self.object.name.clone(),
            size,
            elapsed: started.elapsed(),
        })
    }
}

/// Downloads the object behind `uri` into `dest_dir`.
pub async fn fetch(
    fetcher: &dyn Fetcher,
    uri: &str,
    dest_dir: &Path,
) -> Result<FetchedObject, FetchError> {
    let link = SourceLink::parse(uri)?;
    plan_fetch(fetcher, &link, dest_dir)
        .await?
        .execute(fetcher)
        .await
}

/// Final path component of the remote name, or `fallback` if it has none.
fn local_file_name(remote: &str, fallback: &str) -> String {
    let normalized = remote.replace('\\', "/");
    match Path::new(&normalized).file_name() {
        Some(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => fallback.to_string(),
    }
}
