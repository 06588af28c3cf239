//! SPA static-file handler with index fallback.
//!
//! Request paths are normalized before being joined to the root directory so
//! traversal sequences can never resolve outside it. A path that resolves to
//! an existing file is served with a guessed content type; anything else is
//! answered with the index document, which lets the client-side router own
//! the URL space.

use std::io;
use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::Response;

use crate::error::AppError;
use crate::state::AppState;

/// Outcome of resolving a request path against the root directory.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved {
    /// An existing regular file under the root
    Asset(PathBuf),
    /// No such file; serve the index document
    IndexFallback,
}

/// Normalize a request path into a relative path that cannot escape the
/// directory it is joined to. `..` components pop within the normalized
/// path only, mirroring absolute-path cleaning.
pub fn normalize_request_path(request_path: &str) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in Path::new(request_path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                clean.pop();
            }
            // RootDir, CurDir and prefixes are dropped
            _ => {}
        }
    }
    clean
}

/// Resolve a request path to a static asset or the index fallback.
///
/// Errors other than "not found" during resolution are propagated so they
/// surface as a server error rather than silently serving the index.
pub async fn resolve(root: &Path, request_path: &str) -> io::Result<Resolved> {
    let full = root.join(normalize_request_path(request_path));
    match tokio::fs::metadata(&full).await {
        Ok(meta) if meta.is_file() => Ok(Resolved::Asset(full)),
        // A directory has no content to serve directly
        Ok(_) => Ok(Resolved::IndexFallback),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Resolved::IndexFallback),
        Err(e) => Err(e),
    }
}

/// Fallback handler: serves the resolved asset or the index document.
pub async fn serve(State(state): State<AppState>, uri: Uri) -> Result<Response, AppError> {
    let config = &state.config;
    let path = match resolve(&config.root_dir, uri.path()).await? {
        Resolved::Asset(path) => path,
        Resolved::IndexFallback => config.index_path(),
    };
    serve_file(&path).await
}

/// Read a file and build a response with a guessed content type.
async fn serve_file(path: &Path) -> Result<Response, AppError> {
    let contents = tokio::fs::read(path).await?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let mut response = Response::new(Body::from(contents));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn normalization_strips_roots_and_traversal() {
        assert_eq!(normalize_request_path("/app.js"), PathBuf::from("app.js"));
        assert_eq!(
            normalize_request_path("/assets/img/logo.png"),
            PathBuf::from("assets/img/logo.png")
        );
        assert_eq!(
            normalize_request_path("/../../etc/passwd"),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(
            normalize_request_path("/a/../../b"),
            PathBuf::from("b")
        );
        assert_eq!(normalize_request_path("/"), PathBuf::new());
        assert_eq!(normalize_request_path("/./app.js"), PathBuf::from("app.js"));
    }

    #[test]
    fn normalized_paths_stay_under_the_join_target() {
        for raw in ["/../x", "/../../..", "/a/../../../b/c", "/.."] {
            let joined = Path::new("/srv/root").join(normalize_request_path(raw));
            assert!(
                joined.starts_with("/srv/root"),
                "{raw} escaped: {}",
                joined.display()
            );
        }
    }

    #[tokio::test]
    async fn resolves_existing_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        let resolved = resolve(dir.path(), "/app.js").await.unwrap();
        assert_eq!(resolved, Resolved::Asset(dir.path().join("app.js")));
    }

    #[tokio::test]
    async fn missing_files_fall_back_to_index() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve(dir.path(), "/some/client/route").await.unwrap();
        assert_eq!(resolved, Resolved::IndexFallback);
    }

    #[tokio::test]
    async fn directories_fall_back_to_index() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("assets")).unwrap();
        let resolved = resolve(dir.path(), "/assets").await.unwrap();
        assert_eq!(resolved, Resolved::IndexFallback);
    }

    #[tokio::test]
    async fn traversal_never_resolves_outside_root() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("public");
        fs::create_dir(&root).unwrap();
        fs::write(parent.path().join("secret.txt"), "nope").unwrap();

        let resolved = resolve(&root, "/../secret.txt").await.unwrap();
        assert_eq!(resolved, Resolved::IndexFallback);
    }
}
