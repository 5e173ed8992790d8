use std::io;
use std::path::{Component, Path, PathBuf};

use base64::Engine;
use codex_bridge_error::BridgeError;
use tempfile::TempDir;

const TEMP_DIR_PREFIX: &str = "codex-bridge-image-";
const UNSUPPORTED_SCHEME: &str =
    "Only file:// URLs, HTTP(S) URLs, or local file paths are supported for images.";

/// A local image file handed to the backend.
#[derive(Debug)]
pub struct Attachment {
    pub path: PathBuf,
    pub cleanup: Option<Cleanup>,
}

impl Attachment {
    fn local(path: PathBuf) -> Self {
        Self {
            path,
            cleanup: None,
        }
    }
}

/// Removes a temporary attachment directory.
///
/// Running it consumes the value. An unrun cleanup removes the directory when
/// dropped.
#[derive(Debug)]
pub struct Cleanup {
    dir: TempDir,
}

impl Cleanup {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn run(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Every cleanup owed by one request.
#[derive(Debug, Default)]
pub struct CleanupSet {
    cleanups: Vec<Cleanup>,
}

impl CleanupSet {
    pub fn push(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }

    pub fn len(&self) -> usize {
        self.cleanups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cleanups.is_empty()
    }

    pub fn run_all(self) {
        for cleanup in self.cleanups {
            let dir = cleanup.path().to_path_buf();
            if let Err(err) = cleanup.run() {
                tracing::warn!(dir = %dir.display(), error = %err, "failed to remove temporary image directory");
            }
        }
    }
}

/// Turns image references from chat messages into local files.
#[derive(Debug, Clone)]
pub struct AttachmentResolver {
    http: reqwest::Client,
    working_directory: Option<PathBuf>,
    temp_root: Option<PathBuf>,
}

impl AttachmentResolver {
    pub fn new(http: reqwest::Client, working_directory: Option<PathBuf>) -> Self {
        Self {
            http,
            working_directory,
            temp_root: None,
        }
    }

    /// Creates temporary image directories under `dir` instead of the system
    /// temp dir.
    pub fn with_temp_root(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_root = dir;
        self
    }

    /// Resolves a `local_image` path reference.
    pub fn resolve_path(&self, reference: &str) -> Result<Attachment, BridgeError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::invalid_request("Image reference cannot be empty."));
        }

        let candidate = Path::new(trimmed);
        if candidate.is_absolute() {
            return Ok(Attachment::local(normalize_lexically(candidate)));
        }

        if let Some(scheme) = url_scheme(trimmed) {
            if !scheme.eq_ignore_ascii_case("file") {
                return Err(BridgeError::invalid_request(UNSUPPORTED_SCHEME));
            }
            return url::Url::parse(trimmed)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .map(Attachment::local)
                .ok_or_else(|| {
                    BridgeError::invalid_request("Invalid file:// URL provided for image attachment.")
                });
        }

        let base = match &self.working_directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|err| BridgeError::Internal {
                message: format!("failed to read current directory: {err}"),
            })?,
        };
        Ok(Attachment::local(normalize_lexically(&base.join(candidate))))
    }

    /// Resolves an `image_url` / `input_image` reference: data URL, remote URL
    /// or local path.
    pub async fn resolve_url(&self, reference: &str) -> Result<Attachment, BridgeError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::invalid_request("Image reference cannot be empty."));
        }
        if trimmed.starts_with("data:") {
            return write_data_url(trimmed, self.temp_root.as_deref()).await;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return self.download(trimmed).await;
        }
        self.resolve_path(trimmed)
    }

    async fn download(&self, url: &str) -> Result<Attachment, BridgeError> {
        let download_error = |detail: String| {
            BridgeError::invalid_request(format!("Failed to download image from {url} ({detail})."))
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| download_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("status {}", status.as_u16())));
        }
        let extension = extension_for_mime(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );
        let bytes = response
            .bytes()
            .await
            .map_err(|err| download_error(err.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "downloaded image attachment");
        write_temp_image(&bytes, extension, self.temp_root.as_deref()).await
    }
}

async fn write_data_url(data_url: &str, temp_root: Option<&Path>) -> Result<Attachment, BridgeError> {
    let invalid = || BridgeError::invalid_request("Invalid data URL provided for image attachment.");

    let rest = &data_url["data:".len()..];
    let (mime, payload) = rest.split_once(';').ok_or_else(invalid)?;
    let payload = payload
        .get(..7)
        .filter(|marker| marker.eq_ignore_ascii_case("base64,"))
        .map(|_| &payload[7..])
        .ok_or_else(invalid)?;
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if mime.is_empty() || payload.is_empty() {
        return Err(invalid());
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|_| invalid())?;
    write_temp_image(&bytes, extension_for_mime(Some(mime)), temp_root).await
}

async fn write_temp_image(
    bytes: &[u8],
    extension: &str,
    temp_root: Option<&Path>,
) -> Result<Attachment, BridgeError> {
    let internal = |err: io::Error| BridgeError::Internal {
        message: format!("failed to write temporary image: {err}"),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_DIR_PREFIX);
    let dir = match temp_root {
        Some(root) => {
            tokio::fs::create_dir_all(root).await.map_err(internal)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
    .map_err(internal)?;
    let path = dir.path().join(format!("attachment.{extension}"));
    // The directory is owned by the cleanup before the write, so a failed
    // write still removes it.
    let cleanup = Cleanup { dir };
    tokio::fs::write(&path, bytes).await.map_err(internal)?;
    Ok(Attachment {
        path,
        cleanup: Some(cleanup),
    })
}

pub(crate) fn extension_for_mime(mime: Option<&str>) -> &'static str {
    let Some(mime) = mime else {
        return "png";
    };
    let mime = mime.to_ascii_lowercase();
    if mime.contains("png") {
        "png"
    } else if mime.contains("jpeg") || mime.contains("jpg") {
        "jpg"
    } else if mime.contains("gif") {
        "gif"
    } else if mime.contains("webp") {
        "webp"
    } else if mime.contains("bmp") {
        "bmp"
    } else {
        "png"
    }
}

/// `scheme` of `scheme:...`, when the value looks like a URL rather than a path.
fn url_scheme(value: &str) -> Option<&str> {
    let (scheme, _) = value.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    (first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphabetic())).then_some(scheme)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
